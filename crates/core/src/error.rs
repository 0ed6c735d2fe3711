//! Top-level error type shared across the renderer crates.

use thiserror::Error;

/// Errors surfaced to the application layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Failures originating in the graphics backend
    #[error("graphics error: {0}")]
    Graphics(String),

    /// Window creation or surface management errors
    #[error("window error: {0}")]
    Window(String),

    /// Shader loading or validation errors
    #[error("shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that indicates a bug rather than a runtime condition
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias using the renderer's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
