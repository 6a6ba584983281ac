//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe wrappers over `ash` for the pieces the frame lifecycle core needs:
//! - Instance, physical device selection and logical device creation
//! - Swapchain creation with vsync / triple-buffer present mode selection
//! - Command pools, host-visible buffers and synchronization primitives
//! - The overlay graphics pipeline
//!
//! The [`backend`] traits are the seam the renderer records through, so the
//! frame logic can run against a recording mock in tests.

mod error;

pub mod backend;
pub mod buffer;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
