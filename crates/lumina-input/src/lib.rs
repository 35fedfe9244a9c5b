//! Input handling for the Lumina engine.
//!
//! [`InputState`] is fed winit window events by the application runner and
//! answers per-frame queries about keys, mouse buttons, cursor motion and
//! modifier keys.
//!
//! ```ignore
//! fn update(input: &InputState) {
//!     if input.is_key_pressed(KeyCode::KeyW) {
//!         // move forward
//!     }
//!     if input.is_key_repeated(KeyCode::Backspace) {
//!         // delete another character
//!     }
//! }
//! ```
//!
//! The runner calls [`InputState::end_frame`] after every update so that
//! "just pressed" and "just released" only hold for a single frame.

mod button;
mod input;
mod modifiers;
mod mouse;

pub use button::{ButtonState, ButtonTracker};
pub use input::InputState;
pub use modifiers::Modifiers;
pub use mouse::{MouseButton, MouseState};

pub use winit::event::{DeviceEvent, WindowEvent};
pub use winit::keyboard::KeyCode;
