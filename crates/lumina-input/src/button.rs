//! Per-button press state.

use hashbrown::{HashMap, HashSet};
use std::hash::Hash;

/// State of a key or mouse button within the current frame.
///
/// ```text
/// Released ─press─> JustPressed ─end_frame─> Pressed
///     ^                                         │
///     └──────end_frame──── JustReleased <─release┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    JustPressed,
    Pressed,
    JustReleased,
    #[default]
    Released,
}

impl ButtonState {
    /// Down this frame, whether newly or held.
    #[inline]
    #[must_use]
    pub const fn is_pressed(self) -> bool {
        matches!(self, Self::JustPressed | Self::Pressed)
    }

    #[inline]
    #[must_use]
    pub const fn is_just_pressed(self) -> bool {
        matches!(self, Self::JustPressed)
    }

    #[inline]
    #[must_use]
    pub const fn is_just_released(self) -> bool {
        matches!(self, Self::JustReleased)
    }

    #[inline]
    #[must_use]
    pub const fn is_released(self) -> bool {
        matches!(self, Self::JustReleased | Self::Released)
    }

    #[inline]
    pub fn press(&mut self) {
        if !self.is_pressed() {
            *self = Self::JustPressed;
        }
    }

    #[inline]
    pub fn release(&mut self) {
        if self.is_pressed() {
            *self = Self::JustReleased;
        }
    }

    /// Settle single-frame states.
    #[inline]
    pub fn end_frame(&mut self) {
        match *self {
            Self::JustPressed => *self = Self::Pressed,
            Self::JustReleased => *self = Self::Released,
            _ => {}
        }
    }
}

/// Button states keyed by button identifier, plus OS key-repeat events.
#[derive(Debug)]
pub struct ButtonTracker<K> {
    states: HashMap<K, ButtonState>,
    repeated: HashSet<K>,
}

impl<K> Default for ButtonTracker<K> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
            repeated: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> ButtonTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, button: K) {
        self.states.entry(button).or_default().press();
    }

    pub fn release(&mut self, button: K) {
        self.states.entry(button).or_default().release();
    }

    /// Record an auto-repeat event of a held button.
    pub fn repeat(&mut self, button: K) {
        self.states.entry(button).or_default().press();
        self.repeated.insert(button);
    }

    #[must_use]
    pub fn state(&self, button: K) -> ButtonState {
        self.states.get(&button).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn is_pressed(&self, button: K) -> bool {
        self.state(button).is_pressed()
    }

    #[must_use]
    pub fn is_just_pressed(&self, button: K) -> bool {
        self.state(button).is_just_pressed()
    }

    #[must_use]
    pub fn is_just_released(&self, button: K) -> bool {
        self.state(button).is_just_released()
    }

    #[must_use]
    pub fn is_released(&self, button: K) -> bool {
        self.state(button).is_released()
    }

    /// Whether the OS sent a repeat event for `button` this frame.
    #[must_use]
    pub fn is_repeated(&self, button: K) -> bool {
        self.repeated.contains(&button)
    }

    pub fn end_frame(&mut self) {
        for state in self.states.values_mut() {
            state.end_frame();
        }
        self.states.retain(|_, s| *s != ButtonState::Released);
        self.repeated.clear();
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.repeated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_hold_release_cycle() {
        let mut state = ButtonState::Released;
        state.press();
        assert!(state.is_just_pressed());
        state.end_frame();
        assert_eq!(state, ButtonState::Pressed);
        state.press();
        assert_eq!(state, ButtonState::Pressed);
        state.release();
        assert!(state.is_just_released());
        assert!(state.is_released());
        state.end_frame();
        assert_eq!(state, ButtonState::Released);
    }

    #[test]
    fn release_without_press_is_ignored() {
        let mut state = ButtonState::Released;
        state.release();
        assert_eq!(state, ButtonState::Released);
    }

    #[test]
    fn repeats_last_one_frame() {
        let mut keys = ButtonTracker::new();
        keys.press('a');
        keys.end_frame();
        keys.repeat('a');
        assert!(keys.is_repeated('a'));
        assert!(keys.is_pressed('a'));
        assert!(!keys.is_just_pressed('a'));
        keys.end_frame();
        assert!(!keys.is_repeated('a'));
        assert!(keys.is_pressed('a'));
    }

    #[test]
    fn untracked_buttons_read_as_released() {
        let mut keys = ButtonTracker::new();
        assert!(keys.is_released(1u8));
        keys.press(1u8);
        keys.release(1u8);
        keys.end_frame();
        assert!(keys.is_released(1u8));
        assert!(!keys.is_just_released(1u8));
    }
}
