//! Core types, math, and traits for the Lumina engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - The engine-wide error taxonomy
//! - Math utilities (frustum, bounding volumes)
//! - The [`Dirty`] wrapper for lazily recomputed values
//! - Compile-time engine limits

pub mod dirty;
pub mod error;
pub mod math;

pub use dirty::{set_if_changed, Dirty};
pub use error::{Error, ErrorKind, Result};
pub use math::{Aabb, BoundingSphere, Frustum};

/// Engine-wide constants
pub mod constants {
    /// Frames in flight when the configuration does not say otherwise
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
    /// Upper bound on frames in flight
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    /// Maximum live directional lights
    pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
    /// Maximum live point lights
    pub const MAX_POINT_LIGHTS: usize = 32;
    /// Maximum live spot lights
    pub const MAX_SPOT_LIGHTS: usize = 32;

    /// Number of camera frustum cascades used for shadow mapping
    pub const SHADOW_CASCADE_COUNT: usize = 4;
    /// Cube faces rendered for a point light shadow map
    pub const POINT_LIGHT_SHADOW_FACES: usize = 6;
    /// Edge length of a shadow map layer in texels
    pub const SHADOW_MAP_RESOLUTION: u32 = 2048;
    /// Light intensity below which a light is considered to have no effect.
    /// The influence radius of a point or spot light is `sqrt(intensity / threshold)`.
    pub const LIGHT_FALLOFF_THRESHOLD: f32 = 0.01;

    /// Minimum `maxPerStageDescriptorSampledImages` required for bindless textures
    pub const BINDLESS_TEXTURE_THRESHOLD: u32 = 4096;
    /// Upper bound on the bindless texture array, even on devices reporting more
    pub const MAX_BINDLESS_TEXTURES: u32 = 16384;
    /// Texture array size of a per-material set when bindless is unavailable
    pub const DYNAMIC_TEXTURE_ARRAY_SIZE: u32 = 8;

    /// Vertex color sets consumed from imported meshes
    pub const MAX_VERTEX_COLOR_SETS: usize = 2;
    /// UV sets consumed from imported meshes
    pub const MAX_UV_SETS: usize = 2;
}
