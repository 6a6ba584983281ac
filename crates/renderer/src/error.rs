//! Frame loop error types.

use kiln_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame scheduler.
///
/// Transient conditions (minimized window, out-of-date swapchain) are not
/// errors; they show up as a skipped frame instead.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Device, swapchain or queue failure.
    #[error("RHI error: {0}")]
    Rhi(#[from] RhiError),

    /// `begin_frame` was called while a frame was already acquired.
    #[error("a frame is already in flight for recording")]
    FrameInFlight,

    /// `end_frame` or `abandon_frame` was called without an acquired frame.
    #[error("no frame has been acquired")]
    NoFrameAcquired,
}

impl FrameError {
    /// Whether the device was lost; nothing but shutdown is possible after it.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, FrameError::Rhi(e) if e.is_device_lost())
    }
}

/// Result type for frame loop operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
