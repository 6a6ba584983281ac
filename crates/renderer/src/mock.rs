//! Recording device shared by the unit and integration tests.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use ash::vk::{self, Handle};

use kiln_rhi::backend::{BufferAllocator, CommandDevice, DrawDevice, MappedBuffer};
use kiln_rhi::buffer::BufferUsage;
use kiln_rhi::{RhiError, RhiResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    WaitIdle,
    CreatePool(u32),
    AllocateBuffers(u32),
    DestroyPool,
    Begin(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Transition(vk::ImageLayout, vk::ImageLayout),
    BeginRendering([f32; 4]),
    EndRendering,
    BindPipeline,
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    Viewport(f32, f32),
    Scissor(vk::Rect2D),
    PushConstants(Vec<u8>),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
    Copy {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CreateBuffer(BufferUsage, vk::DeviceSize),
    Write(vk::Buffer, usize),
    Flush(vk::Buffer),
    DestroyBuffer(vk::Buffer),
    /// Placed by test code between device calls.
    Marker(&'static str),
}

#[derive(Default)]
pub struct MockDevice {
    calls: RefCell<Vec<Call>>,
    next_handle: Cell<u64>,
    pub fail_buffer_creation: Cell<bool>,
    pub fail_begin: Cell<bool>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocator(self: &Arc<Self>) -> MockAllocator {
        MockAllocator(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| pred(call)).count()
    }

    pub fn mark(&self, label: &'static str) {
        self.record(Call::Marker(label));
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn handle(&self) -> u64 {
        let next = self.next_handle.get() + 1;
        self.next_handle.set(next);
        next
    }
}

impl CommandDevice for MockDevice {
    fn wait_idle(&self) -> RhiResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn create_command_pool(&self, queue_family: u32) -> RhiResult<vk::CommandPool> {
        self.record(Call::CreatePool(queue_family));
        Ok(vk::CommandPool::from_raw(self.handle()))
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.record(Call::AllocateBuffers(count));
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.handle()))
            .collect())
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.record(Call::DestroyPool);
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        if self.fail_begin.get() {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        self.record(Call::Begin(cmd));
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Call::End(cmd));
        Ok(())
    }
}

impl DrawDevice for MockDevice {
    fn transition_image(
        &self,
        _cmd: vk::CommandBuffer,
        _image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        self.record(Call::Transition(from, to));
    }

    fn begin_rendering(
        &self,
        _cmd: vk::CommandBuffer,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        self.record(Call::BeginRendering(clear_color));
    }

    fn end_rendering(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRendering);
    }

    fn bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline);
    }

    fn bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _index_type: vk::IndexType,
    ) {
        self.record(Call::BindIndexBuffer(buffer));
    }

    fn set_viewport(&self, _cmd: vk::CommandBuffer, width: f32, height: f32) {
        self.record(Call::Viewport(width, height));
    }

    fn set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(Call::Scissor(scissor));
    }

    fn push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(Call::PushConstants(data.to_vec()));
    }

    fn draw_indexed(
        &self,
        _cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.record(Call::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }

    fn copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(Call::Copy { src, dst, size });
    }
}

pub struct MockBuffer {
    device: Arc<MockDevice>,
    handle: vk::Buffer,
    size: vk::DeviceSize,
}

impl MappedBuffer for MockBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if offset + data.len() as vk::DeviceSize > self.size {
            return Err(RhiError::BufferError("write out of range".to_string()));
        }
        self.device.record(Call::Write(self.handle, data.len()));
        Ok(())
    }

    fn flush(&self) -> RhiResult<()> {
        self.device.record(Call::Flush(self.handle));
        Ok(())
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        self.device.record(Call::DestroyBuffer(self.handle));
    }
}

/// Allocator handle over a shared [`MockDevice`].
#[derive(Clone)]
pub struct MockAllocator(pub Arc<MockDevice>);

impl BufferAllocator for MockAllocator {
    type Buffer = MockBuffer;

    fn create_mapped_buffer(
        &self,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<MockBuffer> {
        let device = &self.0;
        if device.fail_buffer_creation.get() {
            return Err(RhiError::BufferError("out of device memory".to_string()));
        }
        device.record(Call::CreateBuffer(usage, size));
        Ok(MockBuffer {
            device: device.clone(),
            handle: vk::Buffer::from_raw(device.handle()),
            size,
        })
    }
}
