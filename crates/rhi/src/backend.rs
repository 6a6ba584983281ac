//! Device seams used by the frame lifecycle core.
//!
//! The renderer never calls `ash` directly while recording a frame. It goes
//! through these traits, which [`Device`](crate::device::Device) and
//! [`Buffer`](crate::buffer::Buffer) implement for real GPUs and tests
//! implement with recording mocks.
//!
//! All command-recording methods take the raw `vk::CommandBuffer` that the
//! caller is currently recording into; they do not validate recording state.

use ash::vk;

use crate::buffer::BufferUsage;
use crate::error::RhiResult;

/// Command pool and command buffer lifetime plus device-wide idling.
pub trait CommandDevice {
    /// Blocks until every queue on the device is idle.
    fn wait_idle(&self) -> RhiResult<()>;

    /// Creates a resettable command pool for `queue_family`.
    fn create_command_pool(&self, queue_family: u32) -> RhiResult<vk::CommandPool>;

    /// Allocates `count` primary command buffers from `pool`.
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    /// Destroys `pool` and implicitly frees every buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Resets `cmd` and puts it into the recording state.
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Ends recording of `cmd`.
    fn end_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
}

/// Commands recorded by the composition pass, the overlay and staging.
pub trait DrawDevice {
    /// Records a colour image layout transition.
    fn transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    );

    /// Begins dynamic rendering into a single colour attachment, clearing it.
    fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );

    /// Ends dynamic rendering.
    fn end_rendering(&self, cmd: vk::CommandBuffer);

    /// Binds a graphics pipeline.
    fn bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Binds `buffer` at vertex binding 0, offset 0.
    fn bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);

    /// Binds `buffer` as the index buffer at offset 0.
    fn bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType);

    /// Sets viewport 0 to cover `width` x `height` from the origin.
    fn set_viewport(&self, cmd: vk::CommandBuffer, width: f32, height: f32);

    /// Sets scissor 0.
    fn set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);

    /// Pushes vertex-stage constants.
    fn push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        offset: u32,
        data: &[u8],
    );

    /// Records an indexed draw of one instance.
    fn draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );

    /// Records a whole-range copy of `size` bytes from `src` to `dst`.
    fn copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
}

/// Creates host-visible, persistently mapped buffers.
pub trait BufferAllocator {
    /// Buffer type handed out by this allocator.
    type Buffer: MappedBuffer;

    /// Creates a mapped buffer of exactly `size` bytes.
    fn create_mapped_buffer(&self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self::Buffer>;
}

/// A buffer whose memory the host can write directly.
pub trait MappedBuffer {
    /// Raw Vulkan buffer handle.
    fn handle(&self) -> vk::Buffer;

    /// Capacity in bytes.
    fn size(&self) -> vk::DeviceSize;

    /// Copies `data` into the mapping at `offset`.
    fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()>;

    /// Makes host writes to the whole mapped range visible to the device.
    fn flush(&self) -> RhiResult<()>;
}
