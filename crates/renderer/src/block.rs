//! Command block: per-slot command buffers and ordered sub-recorders.
//!
//! A [`CommandBlock`] owns one command pool and one primary command buffer per
//! frame slot. Each frame, [`CommandBlock::process`] records the slot's buffer
//! by calling every registered sub-recorder in registration order. A typical
//! registration order is staging uploads, then application logic, then the
//! composition pass.
//!
//! Sub-recorders receive a mutable frame context `C` chosen by the
//! application, so they borrow frame state for the duration of the call
//! instead of capturing it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_renderer::block::CommandBlock;
//! use kiln_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), kiln_rhi::RhiError> {
//! let family = device.graphics_family();
//! let mut block: CommandBlock<Device, u64> = CommandBlock::create(device, 3, family)?;
//! block.add("count", |_cmd, _slot, frames: &mut u64| {
//!     *frames += 1;
//!     Ok(())
//! });
//!
//! let mut frames = 0;
//! if block.process(0, &mut frames) {
//!     let _buffers = block.collect_buffers();
//! }
//! block.destroy();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use kiln_rhi::backend::CommandDevice;
use kiln_rhi::{RhiError, RhiResult};

use crate::FrameSlot;

/// Identifies a registered sub-recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u32);

/// A sub-recorder callback.
pub type Recorder<C> = Box<dyn FnMut(vk::CommandBuffer, FrameSlot, &mut C) -> RhiResult<()>>;

struct SubRecorder<C> {
    id: CommandId,
    name: String,
    record: Recorder<C>,
}

/// Per-slot command buffers plus an ordered list of sub-recorders.
pub struct CommandBlock<D: CommandDevice, C = ()> {
    device: Arc<D>,
    pool: Option<vk::CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
    recorders: Vec<SubRecorder<C>>,
    next_id: u32,
    current_frame: FrameSlot,
    recorded: Option<vk::CommandBuffer>,
}

impl<D: CommandDevice, C> CommandBlock<D, C> {
    /// Creates a pool on `queue_family` and one command buffer per slot.
    ///
    /// # Errors
    ///
    /// Fails if `frame_count` is zero or pool / buffer creation fails. The
    /// pool is destroyed if buffer allocation fails.
    pub fn create(device: Arc<D>, frame_count: usize, queue_family: u32) -> RhiResult<Self> {
        if frame_count == 0 {
            return Err(RhiError::InvalidHandle(
                "command block needs at least one frame slot".to_string(),
            ));
        }

        let pool = device.create_command_pool(queue_family)?;
        let buffers = match device.allocate_command_buffers(pool, frame_count as u32) {
            Ok(buffers) => buffers,
            Err(e) => {
                device.destroy_command_pool(pool);
                return Err(e);
            }
        };

        info!(frame_count, queue_family, "Command block created");

        Ok(Self {
            device,
            pool: Some(pool),
            buffers,
            recorders: Vec::new(),
            next_id: 0,
            current_frame: 0,
            recorded: None,
        })
    }

    /// Appends a named sub-recorder. It runs after every earlier one.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        recorder: impl FnMut(vk::CommandBuffer, FrameSlot, &mut C) -> RhiResult<()> + 'static,
    ) -> CommandId {
        let id = CommandId(self.next_id);
        self.next_id += 1;

        let name = name.into();
        debug!(?id, name = %name, "Sub-recorder added");
        self.recorders.push(SubRecorder {
            id,
            name,
            record: Box::new(recorder),
        });
        id
    }

    /// Removes a sub-recorder; the others keep their relative order.
    pub fn remove(&mut self, id: CommandId) -> bool {
        let before = self.recorders.len();
        self.recorders.retain(|recorder| recorder.id != id);
        self.recorders.len() != before
    }

    /// Records the buffer for `slot`.
    ///
    /// Returns `false` if recording could not begin, any sub-recorder failed,
    /// or recording could not end. The frame is then dropped and
    /// [`collect_buffers`](Self::collect_buffers) returns nothing.
    pub fn process(&mut self, slot: FrameSlot, ctx: &mut C) -> bool {
        self.recorded = None;

        let Some(&cmd) = self.buffers.get(slot) else {
            warn!(
                slot,
                frame_count = self.buffers.len(),
                "Command block has no buffer for slot"
            );
            return false;
        };
        self.current_frame = slot;

        if let Err(e) = self.device.begin_commands(cmd) {
            warn!(slot, "Failed to begin command buffer: {}", e);
            return false;
        }

        for recorder in &mut self.recorders {
            if let Err(e) = (recorder.record)(cmd, slot, ctx) {
                warn!(
                    slot,
                    recorder = %recorder.name,
                    "Sub-recorder failed, dropping frame: {}",
                    e
                );
                // The buffer is reset on the next begin; ending it only
                // leaves it in a defined state.
                if let Err(e) = self.device.end_commands(cmd) {
                    debug!(slot, "Ending aborted command buffer failed: {}", e);
                }
                return false;
            }
        }

        if let Err(e) = self.device.end_commands(cmd) {
            warn!(slot, "Failed to end command buffer: {}", e);
            return false;
        }

        self.recorded = Some(cmd);
        true
    }

    /// Buffers recorded by the last successful [`process`](Self::process).
    pub fn collect_buffers(&self) -> Vec<vk::CommandBuffer> {
        self.recorded.into_iter().collect()
    }

    /// Frees the pool and every buffer, and drops the sub-recorders.
    ///
    /// The device must not be using the buffers. Idempotent.
    pub fn destroy(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };

        self.device.destroy_command_pool(pool);
        self.buffers.clear();
        self.recorders.clear();
        self.recorded = None;
        debug!("Command block destroyed");
    }

    /// Number of per-slot command buffers (zero once destroyed).
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.buffers.len()
    }

    /// Slot most recently passed to [`process`](Self::process).
    #[inline]
    pub fn current_frame(&self) -> FrameSlot {
        self.current_frame
    }

    /// Number of registered sub-recorders.
    #[inline]
    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }

    /// Registered sub-recorder names, in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recorders.iter().map(|recorder| recorder.name.as_str())
    }

    /// Command buffer of `slot`.
    pub fn buffer(&self, slot: FrameSlot) -> Option<vk::CommandBuffer> {
        self.buffers.get(slot).copied()
    }
}

impl<D: CommandDevice, C> Drop for CommandBlock<D, C> {
    fn drop(&mut self) {
        self.destroy();
    }
}
