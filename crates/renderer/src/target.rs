//! Render target: swapchain, presentable images and per-frame sync objects.
//!
//! A [`RenderTarget`] binds a window surface to the device. Its image count is
//! the frame count for everything per-slot (command buffers, draw buffers).
//! Parameter changes (vsync, extent, fullscreen) never mutate a live target;
//! the reload machine destroys it and creates a new one.
//!
//! # Synchronization
//!
//! ```text
//! slot k:   wait in_flight[k] -> acquire (signals image_available[k])
//!           submit (waits image_available[k], signals render_finished[image],
//!                   in_flight[k])
//!           present (waits render_finished[image])
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace, warn};

use kiln_platform::Surface;
use kiln_rhi::device::Device;
use kiln_rhi::instance::Instance;
use kiln_rhi::swapchain::{PresentOptions, Swapchain};
use kiln_rhi::sync::{Fence, Semaphore};
use kiln_rhi::{RhiError, RhiResult};

use crate::FrameSlot;

/// Outcome of acquiring a presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// Image index to render into.
    Image(u32),
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Outcome of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    /// Presented normally.
    Done,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

/// The presentation side of the frame protocol.
///
/// [`Renderer`](crate::scheduler::Renderer) drives a frame purely through
/// this trait.
pub trait PresentTarget {
    /// Number of frame slots (swapchain images). Zero once destroyed.
    fn frame_count(&self) -> usize;

    /// Current drawable extent reported by the window.
    fn surface_extent(&self) -> vk::Extent2D;

    /// Waits until `slot` is no longer used by the GPU and acquires an image.
    fn acquire(&mut self, slot: FrameSlot) -> RhiResult<Acquired>;

    /// Submits `buffers` for `slot`, rendering into `image`.
    fn submit(&mut self, slot: FrameSlot, image: u32, buffers: &[vk::CommandBuffer])
    -> RhiResult<()>;

    /// Queues `image` for presentation after the submission of `slot`.
    fn present(&mut self, slot: FrameSlot, image: u32) -> RhiResult<Presented>;

    /// Marks the target stale so the next loop iteration reloads it.
    fn request_reload(&mut self);

    /// Whether the target needs to be recreated.
    fn reload_requested(&self) -> bool;
}

/// Present mode preferences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetOptions {
    pub vsync: bool,
    pub triple_buffer: bool,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            vsync: false,
            triple_buffer: true,
        }
    }
}

impl From<TargetOptions> for PresentOptions {
    fn from(options: TargetOptions) -> Self {
        PresentOptions {
            vsync: options.vsync,
            triple_buffer: options.triple_buffer,
        }
    }
}

/// A presentable image as seen by the composition pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

struct FrameSync {
    in_flight: Vec<Fence>,
    image_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
}

impl FrameSync {
    fn new(device: &Arc<Device>, frame_count: usize) -> RhiResult<Self> {
        let mut in_flight = Vec::with_capacity(frame_count);
        let mut image_available = Vec::with_capacity(frame_count);
        let mut render_finished = Vec::with_capacity(frame_count);

        for _ in 0..frame_count {
            in_flight.push(Fence::new(device.clone(), true)?);
            image_available.push(Semaphore::new(device.clone())?);
            render_finished.push(Semaphore::new(device.clone())?);
        }

        Ok(Self {
            in_flight,
            image_available,
            render_finished,
        })
    }
}

/// Swapchain-backed render target.
pub struct RenderTarget {
    device: Arc<Device>,
    sync: Option<FrameSync>,
    swapchain: Option<Swapchain>,
    surface: Option<Surface>,
    options: TargetOptions,
    surface_extent: vk::Extent2D,
    reload_requested: bool,
}

impl RenderTarget {
    /// Creates the swapchain and per-slot sync objects for `surface`.
    ///
    /// The target takes ownership of the surface and releases it on
    /// [`destroy`](Self::destroy).
    ///
    /// # Errors
    ///
    /// Fails if the swapchain or any sync object cannot be created. Whatever
    /// was created before the failure, including the surface, is released.
    pub fn create(
        instance: &Instance,
        device: Arc<Device>,
        surface: Surface,
        extent: vk::Extent2D,
        options: TargetOptions,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(
            instance,
            device.clone(),
            surface.handle(),
            extent.width,
            extent.height,
            options.into(),
        )?;
        let frame_count = swapchain.image_count();
        let sync = FrameSync::new(&device, frame_count)?;

        info!(
            frame_count,
            vsync = options.vsync,
            triple_buffer = options.triple_buffer,
            "Render target created: {}x{} {:?} {:?}",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.format(),
            swapchain.present_mode()
        );

        Ok(Self {
            device,
            sync: Some(sync),
            swapchain: Some(swapchain),
            surface: Some(surface),
            options,
            surface_extent: extent,
            reload_requested: false,
        })
    }

    /// Releases sync objects, swapchain and surface, in that order.
    ///
    /// The device must be idle. Calling this on a destroyed target is a no-op.
    pub fn destroy(&mut self) {
        if self.swapchain.is_none() && self.surface.is_none() {
            return;
        }

        self.sync = None;
        self.swapchain = None;
        self.surface = None;
        debug!("Render target destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.swapchain.is_none()
    }

    /// Records the window's current framebuffer extent.
    ///
    /// A mismatch with the swapchain extent makes the target stale.
    pub fn set_surface_extent(&mut self, extent: vk::Extent2D) {
        self.surface_extent = extent;
    }

    /// Options this target was created with.
    pub fn options(&self) -> TargetOptions {
        self.options
    }

    /// Swapchain extent, or zero once destroyed.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map(Swapchain::extent)
            .unwrap_or_default()
    }

    /// Colour format of the presentable images.
    pub fn format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map(Swapchain::format)
            .unwrap_or(vk::Format::UNDEFINED)
    }

    /// Presentable image `index`, if it exists.
    pub fn image(&self, index: u32) -> Option<TargetImage> {
        let swapchain = self.swapchain.as_ref()?;
        let index = index as usize;
        Some(TargetImage {
            image: swapchain.image(index)?,
            view: swapchain.image_view(index)?,
            extent: swapchain.extent(),
            format: swapchain.format(),
        })
    }

    fn resources(&self) -> RhiResult<(&Swapchain, &FrameSync)> {
        match (&self.swapchain, &self.sync) {
            (Some(swapchain), Some(sync)) => Ok((swapchain, sync)),
            _ => Err(RhiError::InvalidHandle(
                "render target has been destroyed".to_string(),
            )),
        }
    }
}

impl PresentTarget for RenderTarget {
    fn frame_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.surface_extent
    }

    fn acquire(&mut self, slot: FrameSlot) -> RhiResult<Acquired> {
        let (swapchain, sync) = self.resources()?;
        let fence = sync.in_flight.get(slot).ok_or_else(|| {
            RhiError::InvalidHandle(format!("frame slot {} out of range", slot))
        })?;
        fence.wait(u64::MAX)?;

        match swapchain.acquire_next_image(sync.image_available[slot].handle()) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    trace!("Swapchain suboptimal during acquire");
                }
                Ok(Acquired::Image(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR) => {
                debug!("Swapchain out of date during acquire");
                self.reload_requested = true;
                Ok(Acquired::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn submit(
        &mut self,
        slot: FrameSlot,
        image: u32,
        buffers: &[vk::CommandBuffer],
    ) -> RhiResult<()> {
        let (_, sync) = self.resources()?;
        let (Some(fence), Some(render_finished)) = (
            sync.in_flight.get(slot),
            sync.render_finished.get(image as usize),
        ) else {
            return Err(RhiError::InvalidHandle(format!(
                "slot {} / image {} out of range",
                slot, image
            )));
        };

        let wait_semaphores = [sync.image_available[slot].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(buffers)
            .signal_semaphores(&signal_semaphores);

        // Reset only right before the submission that signals it again.
        fence.reset()?;
        unsafe { self.device.submit_graphics(&[submit_info], fence.handle()) }
    }

    fn present(&mut self, _slot: FrameSlot, image: u32) -> RhiResult<Presented> {
        let (swapchain, sync) = self.resources()?;
        let render_finished = sync.render_finished.get(image as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!("image {} out of range", image))
        })?;

        let presented = match swapchain.present(
            self.device.present_queue(),
            image,
            render_finished.handle(),
        ) {
            Ok(false) => Presented::Done,
            Ok(true) => Presented::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Presented::OutOfDate
            }
            Err(e) => return Err(e.into()),
        };

        if presented != Presented::Done {
            debug!(?presented, "Swapchain stale after present");
            self.reload_requested = true;
        }
        Ok(presented)
    }

    fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    fn reload_requested(&self) -> bool {
        if self.reload_requested {
            return true;
        }

        let extent = self.extent();
        let stale = self.surface_extent.width != 0
            && self.surface_extent.height != 0
            && self.surface_extent != extent;
        if stale {
            trace!(
                "Surface extent {}x{} differs from swapchain {}x{}",
                self.surface_extent.width,
                self.surface_extent.height,
                extent.width,
                extent.height
            );
        }
        stale
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            warn!("Render target dropped without an explicit destroy");
        }
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_options_default() {
        let options = TargetOptions::default();
        assert!(!options.vsync);
        assert!(options.triple_buffer);
    }

    #[test]
    fn test_target_options_into_present_options() {
        let present: PresentOptions = TargetOptions {
            vsync: true,
            triple_buffer: false,
        }
        .into();
        assert!(present.vsync);
        assert!(!present.triple_buffer);
    }
}
