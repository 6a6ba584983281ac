//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Buffer creation or mapping error
    #[error("Buffer error: {0}")]
    BufferError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Returns the Vulkan result code carried by this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            RhiError::VulkanError(result) => Some(*result),
            _ => None,
        }
    }

    /// True when the error means the device is gone and nothing can recover.
    pub fn is_device_lost(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_DEVICE_LOST)
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
