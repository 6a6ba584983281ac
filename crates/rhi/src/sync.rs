//! Synchronization primitives.
//!
//! - [`Semaphore`] orders GPU work between acquire, submit and present.
//! - [`Fence`] lets the host wait until a frame slot's previous submission
//!   has retired.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan binary semaphore.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        trace!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        trace!("Destroyed semaphore");
    }
}

/// Vulkan fence.
///
/// Frame fences are created signaled so the first wait on a fresh slot
/// returns immediately.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally in the signaled state.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        trace!(signaled, "Created fence");
        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// Only call this right before a submission that will signal it again;
    /// a reset fence with no pending submission blocks the next wait forever.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        trace!("Destroyed fence");
    }
}
