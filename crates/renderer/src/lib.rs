//! Frame lifecycle core.
//!
//! This crate drives one rendered frame per loop iteration:
//! - [`target::RenderTarget`] owns the swapchain and its sync objects
//! - [`scheduler::Renderer`] runs the begin/end frame protocol
//! - [`block::CommandBlock`] records ordered sub-passes per frame slot
//! - [`draw_buffer::DrawBufferPool`] feeds per-slot vertex/index data
//! - [`overlay::Overlay`] records immediate-mode draw lists
//! - [`staging::Staging`] and [`shading::ShadingPass`] are the stock sub-passes,
//!   registered with the application hook by [`frame::register_frame_recorders`]
//! - [`reload::ReloadMachine`] sequences teardown and recreation

pub mod block;
pub mod draw_buffer;
mod error;
pub mod frame;
pub mod overlay;
pub mod reload;
pub mod scheduler;
pub mod shading;
pub mod staging;
pub mod target;

#[cfg(test)]
mod mock;

pub use block::{CommandBlock, CommandId};
pub use draw_buffer::{DrawBufferKind, DrawBufferPool, PoolStats};
pub use error::{FrameError, FrameResult};
pub use frame::{FrameContext, register_frame_recorders};
pub use overlay::{Overlay, OverlayContext, OverlayPipeline};
pub use reload::{
    ReloadError, ReloadHost, ReloadMachine, ReloadOutcome, ReloadRequest, ReloadState,
    ReloadTriggers, Trigger,
};
pub use scheduler::{FrameState, Renderer};
pub use shading::ShadingPass;
pub use staging::Staging;
pub use target::{PresentTarget, RenderTarget, TargetImage, TargetOptions};

/// Index of a per-frame resource set, in `[0, frame_count)`.
pub type FrameSlot = usize;

/// Byte alignment draw-buffer capacities are rounded up to.
pub const DRAW_BUFFER_ALIGNMENT: u64 = 256;
