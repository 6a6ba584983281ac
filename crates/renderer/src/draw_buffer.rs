//! Dynamic per-slot vertex and index buffers.
//!
//! Every frame slot owns one vertex and one index buffer. A buffer is created
//! the first time a slot needs a non-zero size and replaced only when a
//! larger size is required, so capacity never shrinks. Capacities are rounded
//! up to the pool alignment to avoid reallocating on small growth.
//!
//! Allocation failure is not fatal: the slot keeps whatever buffer it had,
//! the failure is counted in [`PoolStats`], and the caller skips drawing
//! for that slot this frame.

use ash::vk;
use tracing::{debug, warn};

use kiln_rhi::backend::{BufferAllocator, MappedBuffer};
use kiln_rhi::buffer::BufferUsage;

use crate::FrameSlot;

/// Which of a slot's two buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawBufferKind {
    Vertex,
    Index,
}

impl DrawBufferKind {
    fn usage(self) -> BufferUsage {
        match self {
            DrawBufferKind::Vertex => BufferUsage::Vertex,
            DrawBufferKind::Index => BufferUsage::Index,
        }
    }
}

/// Rounds `required` up to a multiple of `alignment`.
pub fn aligned_size(required: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    required.div_ceil(alignment) * alignment
}

/// Allocation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created (first use or growth).
    pub allocations: u64,
    /// Failed creations or writes.
    pub failures: u64,
    /// Uploads that were abandoned, so the draw was skipped.
    pub skipped: u64,
}

/// Buffers ready to bind for one frame's draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadedDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
}

struct SlotBuffers<B> {
    vertex: Option<B>,
    index: Option<B>,
}

impl<B> SlotBuffers<B> {
    fn get(&self, kind: DrawBufferKind) -> &Option<B> {
        match kind {
            DrawBufferKind::Vertex => &self.vertex,
            DrawBufferKind::Index => &self.index,
        }
    }

    fn get_mut(&mut self, kind: DrawBufferKind) -> &mut Option<B> {
        match kind {
            DrawBufferKind::Vertex => &mut self.vertex,
            DrawBufferKind::Index => &mut self.index,
        }
    }
}

/// Grow-only per-slot draw buffers.
pub struct DrawBufferPool<A: BufferAllocator> {
    allocator: A,
    alignment: vk::DeviceSize,
    slots: Vec<SlotBuffers<A::Buffer>>,
    stats: PoolStats,
}

impl<A: BufferAllocator> DrawBufferPool<A> {
    /// Creates an empty pool with `frame_count` independent slots.
    pub fn new(allocator: A, frame_count: usize, alignment: vk::DeviceSize) -> Self {
        let slots = (0..frame_count)
            .map(|_| SlotBuffers {
                vertex: None,
                index: None,
            })
            .collect();

        Self {
            allocator,
            alignment: alignment.max(1),
            slots,
            stats: PoolStats::default(),
        }
    }

    /// Makes sure `slot`'s `kind` buffer holds at least `required` bytes.
    ///
    /// A zero `required` creates nothing and returns `None`. An existing
    /// buffer that is large enough is returned unchanged. Otherwise a new
    /// buffer of `aligned_size(required)` replaces it; if that fails the old
    /// buffer stays in place and `None` is returned.
    pub fn reserve(
        &mut self,
        slot: FrameSlot,
        kind: DrawBufferKind,
        required: vk::DeviceSize,
    ) -> Option<&A::Buffer> {
        if required == 0 {
            return None;
        }

        let alignment = self.alignment;
        let entry = self.slots.get_mut(slot)?.get_mut(kind);

        let grow = entry
            .as_ref()
            .is_none_or(|buffer| buffer.size() < required);
        if grow {
            let capacity = aligned_size(required, alignment);
            match self.allocator.create_mapped_buffer(kind.usage(), capacity) {
                Ok(buffer) => {
                    debug!(slot, ?kind, capacity, "Draw buffer allocated");
                    *entry = Some(buffer);
                    self.stats.allocations += 1;
                }
                Err(e) => {
                    warn!(slot, ?kind, capacity, "Draw buffer allocation failed: {}", e);
                    self.stats.failures += 1;
                    return None;
                }
            }
        }

        entry.as_ref()
    }

    /// Writes one frame's vertex and index bytes into `slot`'s buffers and
    /// flushes both.
    ///
    /// Returns `None` when either side is empty (nothing is created) or when
    /// any buffer could not be grown or written; the draw is then skipped.
    pub fn upload(
        &mut self,
        slot: FrameSlot,
        vertices: &[u8],
        indices: &[u8],
    ) -> Option<UploadedDraw> {
        if vertices.is_empty() || indices.is_empty() {
            return None;
        }

        let vertex_buffer = self.write(slot, DrawBufferKind::Vertex, vertices);
        let index_buffer = vertex_buffer.and_then(|_| self.write(slot, DrawBufferKind::Index, indices));

        match (vertex_buffer, index_buffer) {
            (Some(vertex_buffer), Some(index_buffer)) => Some(UploadedDraw {
                vertex_buffer,
                index_buffer,
            }),
            _ => {
                self.stats.skipped += 1;
                None
            }
        }
    }

    fn write(&mut self, slot: FrameSlot, kind: DrawBufferKind, data: &[u8]) -> Option<vk::Buffer> {
        let buffer = self.reserve(slot, kind, data.len() as vk::DeviceSize)?;
        let handle = buffer.handle();
        let result = buffer.write_data(0, data).and_then(|()| buffer.flush());

        match result {
            Ok(()) => Some(handle),
            Err(e) => {
                warn!(slot, ?kind, "Draw buffer write failed: {}", e);
                self.stats.failures += 1;
                None
            }
        }
    }

    /// Current capacity of `slot`'s `kind` buffer; zero if unset.
    pub fn capacity(&self, slot: FrameSlot, kind: DrawBufferKind) -> vk::DeviceSize {
        self.slots
            .get(slot)
            .and_then(|buffers| buffers.get(kind).as_ref())
            .map_or(0, MappedBuffer::size)
    }

    /// Number of independent slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Releases every buffer; slots stay and refill lazily.
    pub fn clear(&mut self) {
        for buffers in &mut self.slots {
            buffers.vertex = None;
            buffers.index = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DRAW_BUFFER_ALIGNMENT;
    use crate::mock::{Call, MockAllocator, MockDevice};

    fn pool(frame_count: usize) -> (std::sync::Arc<MockDevice>, DrawBufferPool<MockAllocator>) {
        let device = MockDevice::new();
        let pool = DrawBufferPool::new(device.allocator(), frame_count, DRAW_BUFFER_ALIGNMENT);
        (device, pool)
    }

    fn creations(device: &MockDevice) -> usize {
        device.count(|call| matches!(call, Call::CreateBuffer(..)))
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(1, 256), 256);
        assert_eq!(aligned_size(256, 256), 256);
        assert_eq!(aligned_size(257, 256), 512);
        assert_eq!(aligned_size(1024, 256), 1024);
        assert_eq!(aligned_size(0, 256), 0);
        assert_eq!(aligned_size(5, 0), 5);
    }

    #[test]
    fn test_one_slot_per_frame() {
        let (_, pool) = pool(3);
        assert_eq!(pool.slot_count(), 3);
        for slot in 0..3 {
            assert_eq!(pool.capacity(slot, DrawBufferKind::Vertex), 0);
        }
    }

    #[test]
    fn test_zero_size_never_creates() {
        let (device, mut pool) = pool(2);
        assert!(pool.reserve(0, DrawBufferKind::Vertex, 0).is_none());
        assert!(pool.upload(0, &[], &[]).is_none());
        assert!(pool.upload(0, &[1, 2, 3], &[]).is_none());
        assert_eq!(creations(&device), 0);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_growth_from_1024_to_2048() {
        let (device, mut pool) = pool(2);

        pool.reserve(0, DrawBufferKind::Vertex, 1024).unwrap();
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 1024);
        assert_eq!(creations(&device), 1);

        pool.reserve(0, DrawBufferKind::Vertex, 2048).unwrap();
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 2048);
        assert_eq!(creations(&device), 2);
    }

    #[test]
    fn test_capacity_is_rounded_to_alignment() {
        let (device, mut pool) = pool(1);
        pool.reserve(0, DrawBufferKind::Index, 300).unwrap();
        assert_eq!(pool.capacity(0, DrawBufferKind::Index), 512);
        assert!(device.calls().contains(&Call::CreateBuffer(BufferUsage::Index, 512)));
    }

    #[test]
    fn test_smaller_or_equal_requests_reuse() {
        let (device, mut pool) = pool(1);
        let first = pool.reserve(0, DrawBufferKind::Vertex, 700).unwrap().handle();

        for required in [700, 768, 1, 512, 768] {
            let handle = pool.reserve(0, DrawBufferKind::Vertex, required).unwrap().handle();
            assert_eq!(handle, first);
        }
        assert_eq!(creations(&device), 1);
    }

    #[test]
    fn test_capacity_is_monotonic() {
        let (_, mut pool) = pool(1);
        let mut last = 0;
        for required in [10, 5000, 300, 0, 4097, 12, 9000, 1] {
            pool.reserve(0, DrawBufferKind::Vertex, required);
            let capacity = pool.capacity(0, DrawBufferKind::Vertex);
            assert!(capacity >= last);
            assert!(capacity >= required);
            last = capacity;
        }
    }

    #[test]
    fn test_slots_are_independent() {
        let (_, mut pool) = pool(3);
        pool.reserve(1, DrawBufferKind::Vertex, 4096).unwrap();
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 0);
        assert_eq!(pool.capacity(1, DrawBufferKind::Vertex), 4096);
        assert_eq!(pool.capacity(1, DrawBufferKind::Index), 0);
        assert_eq!(pool.capacity(2, DrawBufferKind::Vertex), 0);
    }

    #[test]
    fn test_out_of_range_slot() {
        let (device, mut pool) = pool(2);
        assert!(pool.reserve(2, DrawBufferKind::Vertex, 64).is_none());
        assert_eq!(pool.capacity(2, DrawBufferKind::Vertex), 0);
        assert_eq!(creations(&device), 0);
    }

    #[test]
    fn test_growth_failure_keeps_old_buffer() {
        let (device, mut pool) = pool(1);
        let old = pool.reserve(0, DrawBufferKind::Vertex, 256).unwrap().handle();

        device.fail_buffer_creation.set(true);
        assert!(pool.reserve(0, DrawBufferKind::Vertex, 1024).is_none());
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 256);
        assert_eq!(pool.stats().failures, 1);
        assert!(!device.calls().contains(&Call::DestroyBuffer(old)));

        device.fail_buffer_creation.set(false);
        assert_eq!(pool.reserve(0, DrawBufferKind::Vertex, 128).unwrap().handle(), old);
    }

    #[test]
    fn test_upload_failure_skips_draw() {
        let (device, mut pool) = pool(1);
        device.fail_buffer_creation.set(true);

        assert!(pool.upload(0, &[0; 20], &[0; 6]).is_none());
        let stats = pool.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 0);
    }

    #[test]
    fn test_upload_writes_and_flushes_both() {
        let (device, mut pool) = pool(1);
        let draw = pool.upload(0, &[0; 40], &[0; 12]).unwrap();

        let calls = device.calls();
        assert!(calls.contains(&Call::Write(draw.vertex_buffer, 40)));
        assert!(calls.contains(&Call::Flush(draw.vertex_buffer)));
        assert!(calls.contains(&Call::Write(draw.index_buffer, 12)));
        assert!(calls.contains(&Call::Flush(draw.index_buffer)));
        assert_eq!(pool.stats().allocations, 2);
    }

    #[test]
    fn test_replaced_buffer_is_released() {
        let (device, mut pool) = pool(1);
        let old = pool.reserve(0, DrawBufferKind::Vertex, 256).unwrap().handle();
        pool.reserve(0, DrawBufferKind::Vertex, 257).unwrap();
        assert!(device.calls().contains(&Call::DestroyBuffer(old)));
    }

    #[test]
    fn test_clear_releases_all() {
        let (device, mut pool) = pool(2);
        pool.upload(0, &[1; 8], &[1; 4]).unwrap();
        pool.upload(1, &[1; 8], &[1; 4]).unwrap();

        pool.clear();
        assert_eq!(device.count(|call| matches!(call, Call::DestroyBuffer(_))), 4);
        assert_eq!(pool.slot_count(), 2);
        assert_eq!(pool.capacity(0, DrawBufferKind::Vertex), 0);
    }
}
