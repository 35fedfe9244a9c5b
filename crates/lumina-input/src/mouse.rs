//! Mouse state.

use glam::Vec2;
use winit::event::{ElementState, MouseButton as WinitMouseButton, MouseScrollDelta};

use crate::button::ButtonTracker;

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl TryFrom<WinitMouseButton> for MouseButton {
    type Error = ();

    fn try_from(button: WinitMouseButton) -> Result<Self, Self::Error> {
        match button {
            WinitMouseButton::Left => Ok(Self::Left),
            WinitMouseButton::Right => Ok(Self::Right),
            WinitMouseButton::Middle => Ok(Self::Middle),
            WinitMouseButton::Back => Ok(Self::Back),
            WinitMouseButton::Forward => Ok(Self::Forward),
            WinitMouseButton::Other(_) => Err(()),
        }
    }
}

/// Cursor position, per-frame motion, scroll and button states.
#[derive(Debug, Default)]
pub struct MouseState {
    position: Vec2,
    delta: Vec2,
    // Device motion, independent of the cursor position
    raw_delta: Vec2,
    scroll: Vec2,
    buttons: ButtonTracker<MouseButton>,
}

impl MouseState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cursor, accumulating the frame delta.
    pub fn set_position(&mut self, x: f64, y: f64) {
        let position = Vec2::new(x as f32, y as f32);
        self.delta += position - self.position;
        self.position = position;
    }

    pub fn add_raw_motion(&mut self, dx: f64, dy: f64) {
        self.raw_delta += Vec2::new(dx as f32, dy as f32);
    }

    pub fn process_button(&mut self, button: WinitMouseButton, state: ElementState) {
        let Ok(button) = MouseButton::try_from(button) else {
            return;
        };
        match state {
            ElementState::Pressed => self.buttons.press(button),
            ElementState::Released => self.buttons.release(button),
        }
    }

    pub fn process_scroll(&mut self, delta: MouseScrollDelta) {
        self.scroll += match delta {
            MouseScrollDelta::LineDelta(x, y) => Vec2::new(x, y),
            // Roughly one line per 100 pixels
            MouseScrollDelta::PixelDelta(pos) => Vec2::new(pos.x as f32, pos.y as f32) / 100.0,
        };
    }

    #[must_use]
    pub const fn position(&self) -> Vec2 {
        self.position
    }

    #[must_use]
    pub const fn delta(&self) -> Vec2 {
        self.delta
    }

    #[must_use]
    pub const fn raw_delta(&self) -> Vec2 {
        self.raw_delta
    }

    /// Scroll since the last frame in lines (x horizontal, y vertical).
    #[must_use]
    pub const fn scroll_delta(&self) -> Vec2 {
        self.scroll
    }

    #[must_use]
    pub const fn buttons(&self) -> &ButtonTracker<MouseButton> {
        &self.buttons
    }

    pub fn end_frame(&mut self) {
        self.buttons.end_frame();
        self.delta = Vec2::ZERO;
        self.raw_delta = Vec2::ZERO;
        self.scroll = Vec2::ZERO;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_delta_accumulates_within_frame() {
        let mut mouse = MouseState::new();
        mouse.set_position(100.0, 200.0);
        mouse.end_frame();
        mouse.set_position(110.0, 200.0);
        mouse.set_position(150.0, 220.0);
        assert_eq!(mouse.position(), Vec2::new(150.0, 220.0));
        assert_eq!(mouse.delta(), Vec2::new(50.0, 20.0));
        mouse.end_frame();
        assert_eq!(mouse.delta(), Vec2::ZERO);
    }

    #[test]
    fn buttons_and_scroll() {
        let mut mouse = MouseState::new();
        mouse.process_button(WinitMouseButton::Right, ElementState::Pressed);
        assert!(mouse.buttons().is_just_pressed(MouseButton::Right));
        mouse.process_button(WinitMouseButton::Other(9), ElementState::Pressed);

        mouse.process_scroll(MouseScrollDelta::LineDelta(0.0, 1.0));
        mouse.process_scroll(MouseScrollDelta::LineDelta(0.5, 0.5));
        assert_eq!(mouse.scroll_delta(), Vec2::new(0.5, 1.5));

        mouse.end_frame();
        assert!(mouse.buttons().is_pressed(MouseButton::Right));
        assert_eq!(mouse.scroll_delta(), Vec2::ZERO);
    }
}
