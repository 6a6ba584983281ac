//! Host-visible GPU buffers.
//!
//! Every buffer here is persistently mapped: the draw-buffer pool rewrites
//! vertex and index data each frame and staging copies data once. Writes go
//! through [`Buffer::write_data`] and become visible to the device after
//! [`Buffer::flush`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), kiln_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let buffer = Buffer::new(device, BufferUsage::Vertex, 256)?;
//! buffer.write_data(0, bytemuck::cast_slice(&vertices))?;
//! buffer.flush()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::backend::MappedBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-frame vertex data
    Vertex,
    /// Per-frame index data
    Index,
    /// Source of a queued transfer
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Memory location; all kinds live in host-visible memory.
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer with gpu-allocator managed, persistently mapped memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a mapped buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero, or buffer creation, memory
    /// allocation or binding fails. Nothing is leaked on failure.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::BufferError(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Wrap before binding so a bind failure still frees both.
        let this = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_buffer_memory(
                    this.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(this)
    }

    /// Writes `data` into the mapping at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory is not mapped or the write would
    /// exceed the buffer size.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::BufferError(format!(
                "write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| RhiError::BufferError("buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Flushes the whole mapped range of this buffer.
    ///
    /// Harmless on host-coherent memory; required on memory types that are
    /// only host-visible.
    pub fn flush(&self) -> RhiResult<()> {
        let Some(allocation) = &self.allocation else {
            return Err(RhiError::BufferError(
                "buffer allocation is not available".to_string(),
            ));
        };

        let (offset, size) = flush_range(
            allocation.offset(),
            allocation.size(),
            self.device.non_coherent_atom_size(),
        );

        let range = vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.memory() })
            .offset(offset)
            .size(size);

        unsafe { self.device.handle().flush_mapped_memory_ranges(&[range])? };
        Ok(())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl MappedBuffer for Buffer {
    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        Buffer::write_data(self, offset, data)
    }

    fn flush(&self) -> RhiResult<()> {
        Buffer::flush(self)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy buffer
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => tracing::error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Expands a sub-allocation to the non-coherent atom grid.
///
/// The returned range starts on an atom boundary at or before `offset` and
/// covers at least `size` bytes past `offset`.
fn flush_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = (offset + size).div_ceil(atom) * atom;
    (start, end - start)
}
