//! Aggregated keyboard and mouse state.

use glam::Vec2;
use winit::event::{DeviceEvent, ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::button::ButtonTracker;
use crate::modifiers::Modifiers;
use crate::mouse::{MouseButton, MouseState};

/// Keyboard and mouse state for the current frame.
#[derive(Debug, Default)]
pub struct InputState {
    keys: ButtonTracker<KeyCode>,
    modifiers: Modifiers,
    mouse: MouseState,
}

impl InputState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a window event. Returns `true` if it was an input event.
    pub fn process_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                self.process_key_event(event);
                true
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = Modifiers::from(modifiers.state());
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse.set_position(position.x, position.y);
                true
            }
            WindowEvent::MouseInput { button, state, .. } => {
                self.mouse.process_button(*button, *state);
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.mouse.process_scroll(*delta);
                true
            }
            WindowEvent::Focused(false) => {
                // Releases are not delivered to unfocused windows
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Feed a device event (raw mouse motion).
    pub fn process_device_event(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            self.mouse.add_raw_motion(delta.0, delta.1);
        }
    }

    fn process_key_event(&mut self, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        self.apply_key(code, event.state, event.repeat);
    }

    /// Apply a key transition.
    pub fn apply_key(&mut self, code: KeyCode, state: ElementState, repeat: bool) {
        match (state, repeat) {
            (ElementState::Pressed, true) => self.keys.repeat(code),
            (ElementState::Pressed, false) => self.keys.press(code),
            (ElementState::Released, _) => self.keys.release(code),
        }
    }

    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.modifiers = modifiers;
    }

    /// Settle single-frame states and reset per-frame deltas.
    pub fn end_frame(&mut self) {
        self.keys.end_frame();
        self.mouse.end_frame();
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.modifiers = Modifiers::empty();
        self.mouse.clear();
    }

    #[must_use]
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys.is_pressed(key)
    }

    #[must_use]
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.keys.is_just_pressed(key)
    }

    #[must_use]
    pub fn is_key_released(&self, key: KeyCode) -> bool {
        self.keys.is_released(key)
    }

    #[must_use]
    pub fn is_key_just_released(&self, key: KeyCode) -> bool {
        self.keys.is_just_released(key)
    }

    /// Whether `key` auto-repeated this frame.
    #[must_use]
    pub fn is_key_repeated(&self, key: KeyCode) -> bool {
        self.keys.is_repeated(key)
    }

    #[must_use]
    pub const fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    #[must_use]
    pub const fn mouse(&self) -> &MouseState {
        &self.mouse
    }

    #[must_use]
    pub const fn mouse_position(&self) -> Vec2 {
        self.mouse.position()
    }

    #[must_use]
    pub const fn mouse_delta(&self) -> Vec2 {
        self.mouse.delta()
    }

    #[must_use]
    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse.buttons().is_pressed(button)
    }

    #[must_use]
    pub fn is_mouse_just_pressed(&self, button: MouseButton) -> bool {
        self.mouse.buttons().is_just_pressed(button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lifecycle_with_repeat() {
        let mut input = InputState::new();
        input.apply_key(KeyCode::KeyW, ElementState::Pressed, false);
        assert!(input.is_key_just_pressed(KeyCode::KeyW));
        input.end_frame();

        input.apply_key(KeyCode::KeyW, ElementState::Pressed, true);
        assert!(input.is_key_repeated(KeyCode::KeyW));
        assert!(input.is_key_pressed(KeyCode::KeyW));
        input.end_frame();

        input.apply_key(KeyCode::KeyW, ElementState::Released, false);
        assert!(input.is_key_just_released(KeyCode::KeyW));
        assert!(!input.is_key_repeated(KeyCode::KeyW));
        input.end_frame();
        assert!(input.is_key_released(KeyCode::KeyW));
    }

    #[test]
    fn focus_loss_clears_held_keys() {
        let mut input = InputState::new();
        input.apply_key(KeyCode::ShiftLeft, ElementState::Pressed, false);
        input.set_modifiers(Modifiers::SHIFT);
        assert!(input.process_window_event(&WindowEvent::Focused(false)));
        assert!(!input.is_key_pressed(KeyCode::ShiftLeft));
        assert_eq!(input.modifiers(), Modifiers::empty());
    }
}
