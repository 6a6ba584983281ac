//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval and gpu-allocator
//! initialization. [`Device`] also implements the [`backend`](crate::backend)
//! traits, which is how the renderer records commands and allocates mapped
//! buffers without touching `ash` directly.
//!
//! # Example
//!
//! ```no_run
//! use kiln_rhi::instance::Instance;
//! use kiln_rhi::physical_device::select_physical_device;
//! use kiln_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let physical_device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//! let graphics_queue = device.graphics_queue();
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::backend::{BufferAllocator, CommandDevice, DrawDevice};
use crate::buffer::{Buffer, BufferUsage};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Owns the logical device, its queues and the memory allocator. Shared as
/// `Arc<Device>` by every object that creates or destroys device children.
///
/// # Thread Safety
///
/// The allocator is protected by a `Mutex`; everything else is immutable
/// after creation.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator (thread-safe via Mutex).
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
    /// Granularity for flushing non-coherent mapped memory.
    non_coherent_atom_size: vk::DeviceSize,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// Enables the swapchain extension and the Vulkan 1.3 dynamic rendering
    /// feature, then initializes the gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the physical device lacks a graphics or present
    /// queue, device creation fails or allocator initialization fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created on '{}'",
            physical_device_info.device_name()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            non_coherent_atom_size: physical_device_info
                .properties
                .limits
                .non_coherent_atom_size
                .max(1),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Graphics queue family, guaranteed present after [`Device::new`].
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.queue_families.graphics_family.unwrap_or_default()
    }

    /// Present queue family, guaranteed present after [`Device::new`].
    #[inline]
    pub fn present_family(&self) -> u32 {
        self.queue_families.present_family.unwrap_or_default()
    }

    /// Flush granularity for host-visible memory.
    #[inline]
    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.non_coherent_atom_size
    }

    /// Locks the GPU memory allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous holder panicked while allocating.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::BufferError("allocator mutex poisoned".to_string()))
    }

    /// Waits for the device to become idle.
    ///
    /// Blocks until all outstanding work on all queues has completed.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if provided) is unsignaled and not in use
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl CommandDevice for Device {
    fn wait_idle(&self) -> RhiResult<()> {
        Device::wait_idle(self)
    }

    fn create_command_pool(&self, queue_family: u32) -> RhiResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { self.device.create_command_pool(&create_info, None)? };
        debug!("Command pool created for queue family {}", queue_family);
        Ok(pool)
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { self.device.allocate_command_buffers(&alloc_info)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
        debug!("Command pool destroyed");
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }
}

impl DrawDevice for Device {
    fn transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        let (src_stage, src_access, dst_stage, dst_access) = transition_masks(from, to);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            )
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        unsafe { self.device.cmd_begin_rendering(cmd, &rendering_info) };
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) };
    }

    fn bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) };
    }

    fn bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, 0, index_type) };
    }

    fn set_viewport(&self, cmd: vk::CommandBuffer, width: f32, height: f32) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX, offset, data)
        };
    }

    fn draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0)
        };
    }

    fn copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }
}

impl BufferAllocator for Arc<Device> {
    type Buffer = Buffer;

    fn create_mapped_buffer(&self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Buffer> {
        Buffer::new(Arc::clone(self), usage, size)
    }
}

/// Pipeline stages and access masks for the colour transitions a frame uses.
fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => {
            debug!("Generic layout transition: {:?} -> {:?}", from, to);
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        // The allocator frees its memory blocks through the device, so it goes first.
        unsafe { ManuallyDrop::drop(&mut self.allocator) };

        unsafe { self.device.destroy_device(None) };
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, queues and the physical device are plain
// handles, and the allocator sits behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    #[test]
    fn test_transition_masks_for_frame_layouts() {
        let (_, src_access, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert!(src_access.is_empty());
        assert_eq!(dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let (src_stage, src_access, dst_stage, _) = transition_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }
}
