//! Application framework for the Lumina engine.
//!
//! This crate handles the boilerplate around a [`Renderer`]:
//! - logging initialization
//! - window creation and the winit event loop
//! - device and renderer construction from an [`AppConfig`]
//! - resize flagging and close handling
//! - per-frame input, update and render calls
//!
//! # Example
//!
//! ```no_run
//! use lumina_app::{run_app, AppConfig, AppContext, LuminaApp};
//!
//! struct MyApp;
//!
//! impl LuminaApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &mut AppContext, _dt: f32) {}
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod config;
mod context;
mod runner;

pub use app::LuminaApp;
pub use config::AppConfig;
pub use context::AppContext;
pub use runner::{run_app, FrameStats};

// Re-export commonly used types for convenience
pub use lumina_entity::{Scene, Transform};
pub use lumina_input::{InputState, KeyCode};
pub use lumina_render::{Camera, FrameOutcome, GraphicsSettings, Renderer};
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
