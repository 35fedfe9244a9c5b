//! Modifier key bitmask.

use bitflags::bitflags;
use winit::keyboard::ModifiersState;

bitflags! {
    /// Modifier keys held while an event happened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL  = 1 << 1;
        const ALT   = 1 << 2;
        /// Windows / Command key.
        const SUPER = 1 << 3;
    }
}

impl From<ModifiersState> for Modifiers {
    fn from(state: ModifiersState) -> Self {
        [
            (state.shift_key(), Self::SHIFT),
            (state.control_key(), Self::CTRL),
            (state.alt_key(), Self::ALT),
            (state.super_key(), Self::SUPER),
        ]
        .into_iter()
        .filter(|(held, _)| *held)
        .fold(Self::empty(), |acc, (_, flag)| acc | flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_winit_state() {
        let state = ModifiersState::SHIFT | ModifiersState::ALT;
        let mods = Modifiers::from(state);
        assert_eq!(mods, Modifiers::SHIFT | Modifiers::ALT);
        assert!(!mods.contains(Modifiers::CTRL));
        assert_eq!(Modifiers::from(ModifiersState::empty()), Modifiers::empty());
    }
}
