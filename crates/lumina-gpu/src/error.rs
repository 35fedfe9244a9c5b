//! GPU error types.

use ash::vk;
use lumina_core::ErrorKind;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Loading the backend library or creating the instance failed.
    #[error("Backend initialization failed: {0}")]
    Initialization(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Render pass description is inconsistent.
    #[error("Invalid render pass: {0}")]
    InvalidRenderPass(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Index or value outside its valid range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Classify this error within the engine taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Initialization(_)
            | Self::NoSuitableDevice
            | Self::ExtensionNotSupported(_)
            | Self::SurfaceCreation(_)
            | Self::SwapchainCreation(_) => ErrorKind::InitializationFailed,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            _ => ErrorKind::Failure,
        }
    }
}

impl From<GpuError> for lumina_core::Error {
    fn from(err: GpuError) -> Self {
        match err.kind() {
            ErrorKind::InitializationFailed => Self::InitializationFailed(err.to_string()),
            ErrorKind::InvalidArgument => Self::InvalidArgument(err.to_string()),
            ErrorKind::Failure => Self::Failure(err.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
