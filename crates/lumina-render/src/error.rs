//! Render error types.

use lumina_core::ErrorKind;
use lumina_gpu::GpuError;
use std::path::PathBuf;
use thiserror::Error;

/// Render error type.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU backend error.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// No binaries were found for a shader.
    #[error("No shader stages found for '{0}'")]
    ShaderNotFound(String),

    /// Two binaries of a shader map to the same stage.
    #[error("Shader '{path}' has more than one {stage} stage")]
    DuplicateShaderStage { path: String, stage: &'static str },

    /// A shader binary is not valid SPIR-V.
    #[error("Invalid SPIR-V in '{path}': {reason}")]
    InvalidSpirv { path: String, reason: String },

    /// A pipeline was used before a shader was loaded into it.
    #[error("Pipeline has no shader loaded")]
    NoShaderLoaded,

    /// Imported asset data is inconsistent.
    #[error("Invalid asset '{name}': {reason}")]
    InvalidAsset { name: String, reason: String },

    /// Screenshot capture failed.
    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    /// I/O error while reading an asset.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    /// Classify this error within the engine taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Gpu(e) => e.kind(),
            Self::DuplicateShaderStage { .. } | Self::InvalidAsset { .. } => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::Failure,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
