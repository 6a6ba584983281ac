//! Deferred buffer uploads.
//!
//! Data queued with [`Staging::add`] is written into a host-visible staging
//! buffer immediately and copied to its destination the next time a frame
//! records [`Staging::stage`]. Staging buffers stay alive until the same
//! frame slot comes around again, when the GPU is known to be done with them.

use ash::vk;
use tracing::debug;

use kiln_rhi::{RhiError, RhiResult};
use kiln_rhi::backend::{BufferAllocator, DrawDevice, MappedBuffer};
use kiln_rhi::buffer::BufferUsage;

use crate::FrameSlot;

struct PendingCopy<B> {
    source: B,
    destination: vk::Buffer,
}

/// Queue of buffer uploads recorded at the start of a frame.
pub struct Staging<A: BufferAllocator> {
    allocator: A,
    pending: Vec<PendingCopy<A::Buffer>>,
    in_flight: Vec<Vec<A::Buffer>>,
}

impl<A: BufferAllocator> Staging<A> {
    pub fn new(allocator: A, frame_count: usize) -> Self {
        Self {
            allocator,
            pending: Vec::new(),
            in_flight: (0..frame_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Queues `data` to be copied into `destination`.
    pub fn add(&mut self, data: &[u8], destination: vk::Buffer) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let source = self
            .allocator
            .create_mapped_buffer(BufferUsage::Staging, data.len() as vk::DeviceSize)?;
        source.write_data(0, data)?;
        source.flush()?;

        self.pending.push(PendingCopy {
            source,
            destination,
        });
        Ok(())
    }

    /// Records every queued copy into `cmd`.
    ///
    /// Staging buffers from the last time `slot` was recorded are released
    /// first.
    pub fn stage<D: DrawDevice + ?Sized>(
        &mut self,
        device: &D,
        cmd: vk::CommandBuffer,
        slot: FrameSlot,
    ) -> RhiResult<()> {
        let Some(retained) = self.in_flight.get_mut(slot) else {
            return Err(RhiError::InvalidHandle(format!(
                "staging slot {slot} out of range"
            )));
        };
        retained.clear();

        if self.pending.is_empty() {
            return Ok(());
        }

        debug!(count = self.pending.len(), slot, "Staging uploads");
        for copy in self.pending.drain(..) {
            device.copy_buffer(cmd, copy.source.handle(), copy.destination, copy.source.size());
            retained.push(copy.source);
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn slot_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Changes the number of slots after a target reload.
    ///
    /// The device must be idle: retained buffers are released. Queued
    /// uploads stay queued for the first frame after the reload.
    pub fn resize_slots(&mut self, frame_count: usize) {
        self.in_flight.clear();
        self.in_flight.resize_with(frame_count, Vec::new);
    }
}
