//! Frame scheduler.
//!
//! [`Renderer`] runs the begin/end protocol for one frame at a time:
//!
//! ```text
//! Idle --begin_frame--> FrameAcquired --end_frame--> Submitted --present--> Idle
//!                            |
//!                            +--abandon_frame--> Idle
//! ```
//!
//! It never blocks on its own; the only wait happens inside
//! [`PresentTarget::acquire`], on the fence of the slot being reused.
//!
//! # Example
//!
//! ```no_run
//! use kiln_renderer::scheduler::Renderer;
//! use kiln_renderer::target::PresentTarget;
//! use kiln_renderer::FrameResult;
//! use kiln_rhi::vk;
//!
//! # fn example(target: &mut impl PresentTarget, cmd: vk::CommandBuffer) -> FrameResult<()> {
//! let mut renderer = Renderer::new(target.frame_count());
//! if let Some(slot) = renderer.begin_frame(target)? {
//!     // record into the command buffer for `slot` ...
//!     renderer.end_frame(target, &[cmd])?;
//! }
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, trace};

use crate::FrameSlot;
use crate::error::{FrameError, FrameResult};
use crate::target::{Acquired, PresentTarget, Presented};

/// Where the scheduler is in the frame protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// No frame acquired.
    Idle,
    /// An image is acquired and the slot is open for recording.
    FrameAcquired,
    /// Work for the slot was submitted; presentation pending.
    Submitted,
}

/// Begin/end-frame scheduler over a [`PresentTarget`].
#[derive(Debug)]
pub struct Renderer {
    frame_count: usize,
    current_slot: FrameSlot,
    image_index: Option<u32>,
    state: FrameState,
    frames_presented: u64,
}

impl Renderer {
    /// Creates a scheduler for `frame_count` slots, starting at slot 0.
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            current_slot: 0,
            image_index: None,
            state: FrameState::Idle,
            frames_presented: 0,
        }
    }

    /// Rebinds to a recreated target with `frame_count` slots.
    ///
    /// Any acquired frame is forgotten; call only after the device is idle.
    pub fn reset(&mut self, frame_count: usize) {
        self.frame_count = frame_count;
        self.current_slot = 0;
        self.image_index = None;
        self.state = FrameState::Idle;
        debug!(frame_count, "Frame scheduler reset");
    }

    /// Acquires the next image and returns the slot to record into.
    ///
    /// Returns `Ok(None)` when the surface has no drawable area (nothing on
    /// the GPU is touched) or when the swapchain is out of date (the target
    /// is flagged for reload). The caller skips this iteration.
    ///
    /// # Errors
    ///
    /// [`FrameError::FrameInFlight`] if a frame is already acquired, or any
    /// fatal acquisition error.
    pub fn begin_frame<T: PresentTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> FrameResult<Option<FrameSlot>> {
        if self.state != FrameState::Idle {
            return Err(FrameError::FrameInFlight);
        }

        if self.frame_count == 0 {
            trace!("Skipping frame: no frame slots");
            return Ok(None);
        }

        let extent = target.surface_extent();
        if extent.width == 0 || extent.height == 0 {
            trace!("Skipping frame: surface has zero extent");
            return Ok(None);
        }

        match target.acquire(self.current_slot)? {
            Acquired::Image(index) => {
                self.image_index = Some(index);
                self.state = FrameState::FrameAcquired;
                Ok(Some(self.current_slot))
            }
            Acquired::OutOfDate => {
                trace!("Skipping frame: swapchain out of date");
                target.request_reload();
                Ok(None)
            }
        }
    }

    /// Submits `buffers` for the current slot and presents.
    ///
    /// Returns `Ok(true)` if the image reached the presentation engine. An
    /// out-of-date or suboptimal swapchain flags the target for reload rather
    /// than failing. The slot advances in every non-error case.
    ///
    /// # Errors
    ///
    /// [`FrameError::NoFrameAcquired`] without a preceding successful
    /// [`begin_frame`](Self::begin_frame), or any fatal submit/present error.
    pub fn end_frame<T: PresentTarget + ?Sized>(
        &mut self,
        target: &mut T,
        buffers: &[vk::CommandBuffer],
    ) -> FrameResult<bool> {
        let (FrameState::FrameAcquired, Some(image)) = (self.state, self.image_index) else {
            return Err(FrameError::NoFrameAcquired);
        };
        let slot = self.current_slot;

        target.submit(slot, image, buffers)?;
        self.state = FrameState::Submitted;

        let presented = target.present(slot, image)?;
        self.finish_frame();

        match presented {
            Presented::Done => {
                self.frames_presented += 1;
                Ok(true)
            }
            Presented::Suboptimal => {
                self.frames_presented += 1;
                target.request_reload();
                Ok(true)
            }
            Presented::OutOfDate => {
                target.request_reload();
                Ok(false)
            }
        }
    }

    /// Drops an acquired frame whose recording failed.
    ///
    /// The acquired image is never submitted, so the target is flagged for
    /// reload to rebuild its swapchain and semaphores.
    pub fn abandon_frame<T: PresentTarget + ?Sized>(&mut self, target: &mut T) -> FrameResult<()> {
        if self.state != FrameState::FrameAcquired {
            return Err(FrameError::NoFrameAcquired);
        }

        debug!(slot = self.current_slot, "Frame abandoned");
        target.request_reload();
        self.finish_frame();
        Ok(())
    }

    fn finish_frame(&mut self) {
        self.image_index = None;
        self.state = FrameState::Idle;
        self.current_slot = (self.current_slot + 1) % self.frame_count.max(1);
    }

    /// Current protocol state.
    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Slot the next (or current) frame records into.
    #[inline]
    pub fn current_slot(&self) -> FrameSlot {
        self.current_slot
    }

    /// Image acquired for the current frame, if any.
    #[inline]
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Frames handed to the presentation engine since creation.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_rhi::{RhiError, RhiResult};

    struct FakeTarget {
        frame_count: usize,
        extent: vk::Extent2D,
        next_image: u32,
        acquire_out_of_date: bool,
        present_result: Presented,
        acquired: Vec<FrameSlot>,
        submitted: Vec<(FrameSlot, u32, usize)>,
        reload: bool,
    }

    impl FakeTarget {
        fn new(frame_count: usize) -> Self {
            Self {
                frame_count,
                extent: vk::Extent2D {
                    width: 640,
                    height: 480,
                },
                next_image: 0,
                acquire_out_of_date: false,
                present_result: Presented::Done,
                acquired: Vec::new(),
                submitted: Vec::new(),
                reload: false,
            }
        }
    }

    impl PresentTarget for FakeTarget {
        fn frame_count(&self) -> usize {
            self.frame_count
        }

        fn surface_extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn acquire(&mut self, slot: FrameSlot) -> RhiResult<Acquired> {
            self.acquired.push(slot);
            if self.acquire_out_of_date {
                return Ok(Acquired::OutOfDate);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.frame_count as u32;
            Ok(Acquired::Image(image))
        }

        fn submit(
            &mut self,
            slot: FrameSlot,
            image: u32,
            buffers: &[vk::CommandBuffer],
        ) -> RhiResult<()> {
            self.submitted.push((slot, image, buffers.len()));
            Ok(())
        }

        fn present(&mut self, _slot: FrameSlot, _image: u32) -> RhiResult<Presented> {
            Ok(self.present_result)
        }

        fn request_reload(&mut self) {
            self.reload = true;
        }

        fn reload_requested(&self) -> bool {
            self.reload
        }
    }

    #[test]
    fn test_slots_cycle_below_frame_count() {
        let mut target = FakeTarget::new(3);
        let mut renderer = Renderer::new(3);

        let mut slots = Vec::new();
        for _ in 0..7 {
            let slot = renderer.begin_frame(&mut target).unwrap().unwrap();
            assert_eq!(renderer.state(), FrameState::FrameAcquired);
            slots.push(slot);
            assert!(renderer.end_frame(&mut target, &[]).unwrap());
            assert_eq!(renderer.state(), FrameState::Idle);
        }

        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(renderer.frames_presented(), 7);
        assert!(!target.reload_requested());
    }

    #[test]
    fn test_zero_extent_skips_without_acquire() {
        let mut target = FakeTarget::new(2);
        target.extent = vk::Extent2D::default();
        let mut renderer = Renderer::new(2);

        for _ in 0..5 {
            assert_eq!(renderer.begin_frame(&mut target).unwrap(), None);
        }
        assert!(target.acquired.is_empty());
        assert_eq!(renderer.current_slot(), 0);
    }

    #[test]
    fn test_begin_twice_is_frame_in_flight() {
        let mut target = FakeTarget::new(2);
        let mut renderer = Renderer::new(2);

        renderer.begin_frame(&mut target).unwrap();
        assert!(matches!(
            renderer.begin_frame(&mut target),
            Err(FrameError::FrameInFlight)
        ));
    }

    #[test]
    fn test_end_without_begin() {
        let mut target = FakeTarget::new(2);
        let mut renderer = Renderer::new(2);

        assert!(matches!(
            renderer.end_frame(&mut target, &[]),
            Err(FrameError::NoFrameAcquired)
        ));
        assert!(target.submitted.is_empty());
    }

    #[test]
    fn test_out_of_date_acquire_requests_reload() {
        let mut target = FakeTarget::new(2);
        target.acquire_out_of_date = true;
        let mut renderer = Renderer::new(2);

        assert_eq!(renderer.begin_frame(&mut target).unwrap(), None);
        assert!(target.reload_requested());
        assert_eq!(renderer.state(), FrameState::Idle);
        assert_eq!(renderer.current_slot(), 0);
    }

    #[test]
    fn test_suboptimal_present_raises_reload_but_counts_frame() {
        let mut target = FakeTarget::new(2);
        target.present_result = Presented::Suboptimal;
        let mut renderer = Renderer::new(2);

        renderer.begin_frame(&mut target).unwrap();
        assert!(renderer.end_frame(&mut target, &[]).unwrap());
        assert!(target.reload_requested());
        assert_eq!(renderer.frames_presented(), 1);
    }

    #[test]
    fn test_out_of_date_present_is_not_a_failure() {
        let mut target = FakeTarget::new(2);
        target.present_result = Presented::OutOfDate;
        let mut renderer = Renderer::new(2);

        renderer.begin_frame(&mut target).unwrap();
        assert!(!renderer.end_frame(&mut target, &[]).unwrap());
        assert!(target.reload_requested());
        assert_eq!(renderer.current_slot(), 1);
    }

    #[test]
    fn test_abandon_frame_advances_and_requests_reload() {
        let mut target = FakeTarget::new(2);
        let mut renderer = Renderer::new(2);

        renderer.begin_frame(&mut target).unwrap();
        renderer.abandon_frame(&mut target).unwrap();
        assert_eq!(renderer.state(), FrameState::Idle);
        assert_eq!(renderer.current_slot(), 1);
        assert!(target.reload_requested());
        assert!(target.submitted.is_empty());
        assert!(matches!(
            renderer.abandon_frame(&mut target),
            Err(FrameError::NoFrameAcquired)
        ));
    }

    #[test]
    fn test_submit_receives_buffers_for_current_slot() {
        let mut target = FakeTarget::new(2);
        let mut renderer = Renderer::new(2);
        let cmd = <vk::CommandBuffer as vk::Handle>::from_raw(7);

        let slot = renderer.begin_frame(&mut target).unwrap().unwrap();
        renderer.end_frame(&mut target, &[cmd]).unwrap();
        assert_eq!(target.submitted, vec![(slot, 0, 1)]);
    }

    #[test]
    fn test_reset_after_reload() {
        let mut target = FakeTarget::new(2);
        let mut renderer = Renderer::new(2);
        renderer.begin_frame(&mut target).unwrap();
        renderer.end_frame(&mut target, &[]).unwrap();

        renderer.reset(3);
        assert_eq!(renderer.frame_count(), 3);
        assert_eq!(renderer.current_slot(), 0);
        assert_eq!(renderer.state(), FrameState::Idle);
    }

    #[test]
    fn test_rhi_error_propagates() {
        struct LostTarget;
        impl PresentTarget for LostTarget {
            fn frame_count(&self) -> usize {
                1
            }
            fn surface_extent(&self) -> vk::Extent2D {
                vk::Extent2D {
                    width: 1,
                    height: 1,
                }
            }
            fn acquire(&mut self, _slot: FrameSlot) -> RhiResult<Acquired> {
                Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
            }
            fn submit(&mut self, _: FrameSlot, _: u32, _: &[vk::CommandBuffer]) -> RhiResult<()> {
                Ok(())
            }
            fn present(&mut self, _: FrameSlot, _: u32) -> RhiResult<Presented> {
                Ok(Presented::Done)
            }
            fn request_reload(&mut self) {}
            fn reload_requested(&self) -> bool {
                false
            }
        }

        let mut renderer = Renderer::new(1);
        let err = renderer.begin_frame(&mut LostTarget).unwrap_err();
        assert!(err.is_device_lost());
    }
}
