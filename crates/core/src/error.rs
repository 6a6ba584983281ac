//! Error types shared across the application layers.

use thiserror::Error;

/// Main error type for the non-GPU layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced outside the RHI layer
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the shared Error type.
pub type Result<T> = std::result::Result<T, Error>;
