//! Error types for the engine.

use thiserror::Error;

/// Coarse classification of an error, independent of the concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic backend call failure.
    Failure,
    /// Device, instance, swapchain or surface setup failed.
    InitializationFailed,
    /// An index or value was outside its valid range.
    InvalidArgument,
}

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic failure
    #[error("Operation failed: {0}")]
    Failure(String),

    /// Setup failure
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Out of range index or invalid value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InitializationFailed(_) => ErrorKind::InitializationFailed,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Failure(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Failure,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_failures() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert_eq!(
            Error::InvalidArgument("screen 3".into()).kind(),
            ErrorKind::InvalidArgument
        );
    }
}
