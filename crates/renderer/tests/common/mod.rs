//! Shared fakes for the frame cycle integration tests.

#![allow(dead_code)]

#[path = "../../src/mock.rs"]
mod mock;

use std::collections::VecDeque;
use std::sync::Arc;

use ash::vk::{self, Handle};

use kiln_renderer::block::CommandBlock;
use kiln_renderer::target::{Acquired, Presented};
use kiln_renderer::{
    DRAW_BUFFER_ALIGNMENT, FrameContext, FrameSlot, Overlay, OverlayPipeline, PresentTarget,
    ReloadHost, ReloadMachine, ReloadOutcome, ReloadRequest, Renderer, ShadingPass, TargetImage,
    Trigger, register_frame_recorders,
};
use kiln_rhi::RhiResult;
use kiln_rhi::backend::CommandDevice;

pub use mock::{Call, MockAllocator, MockDevice};

/// Swapchain stand-in with scripted acquire and present results.
pub struct TestTarget {
    pub image_count: usize,
    pub extent: vk::Extent2D,
    pub acquired: Vec<FrameSlot>,
    pub submitted: Vec<(FrameSlot, u32, usize)>,
    pub next_acquire: VecDeque<Acquired>,
    pub next_present: VecDeque<Presented>,
    next_image: u32,
    stale: bool,
}

impl TestTarget {
    pub fn new(image_count: usize, extent: vk::Extent2D) -> Self {
        Self {
            image_count,
            extent,
            acquired: Vec::new(),
            submitted: Vec::new(),
            next_acquire: VecDeque::new(),
            next_present: VecDeque::new(),
            next_image: 0,
            stale: false,
        }
    }
}

impl PresentTarget for TestTarget {
    fn frame_count(&self) -> usize {
        self.image_count
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn acquire(&mut self, slot: FrameSlot) -> RhiResult<Acquired> {
        self.acquired.push(slot);
        if let Some(result) = self.next_acquire.pop_front() {
            return Ok(result);
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count as u32;
        Ok(Acquired::Image(image))
    }

    fn submit(&mut self, slot: FrameSlot, image: u32, buffers: &[vk::CommandBuffer]) -> RhiResult<()> {
        self.submitted.push((slot, image, buffers.len()));
        Ok(())
    }

    fn present(&mut self, _slot: FrameSlot, _image: u32) -> RhiResult<Presented> {
        Ok(self.next_present.pop_front().unwrap_or(Presented::Done))
    }

    fn request_reload(&mut self) {
        self.stale = true;
    }

    fn reload_requested(&self) -> bool {
        self.stale
    }
}

pub type FrameBlock = CommandBlock<MockDevice, FrameContext<MockAllocator>>;

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn target_image(extent: vk::Extent2D, index: u32) -> TargetImage {
    TargetImage {
        image: vk::Image::from_raw(2000 + u64::from(index)),
        view: vk::ImageView::from_raw(3000 + u64::from(index)),
        extent,
        format: vk::Format::B8G8R8A8_UNORM,
    }
}

/// Index of the first recorded call matching `pred`.
pub fn position(device: &MockDevice, pred: impl Fn(&Call) -> bool) -> Option<usize> {
    device.calls().iter().position(pred)
}

pub fn count_draws(device: &MockDevice, index_count: u32) -> usize {
    device.count(|call| matches!(call, Call::DrawIndexed { index_count: n, .. } if *n == index_count))
}

/// Application stand-in that owns every reloadable object.
pub struct TestApp {
    pub device: Arc<MockDevice>,
    pub window_extent: vk::Extent2D,
    pub image_count: usize,
    pub vsync: bool,
    pub target: Option<TestTarget>,
    pub renderer: Renderer,
    pub block: Option<FrameBlock>,
    pub frame: FrameContext<MockAllocator>,
    pub log: Vec<String>,
}

impl TestApp {
    pub fn new(image_count: usize) -> Self {
        let device = MockDevice::new();
        Self {
            frame: FrameContext::new(device.allocator(), ShadingPass::default()),
            device,
            window_extent: extent(800, 600),
            image_count,
            vsync: false,
            target: None,
            renderer: Renderer::new(0),
            block: None,
            log: Vec::new(),
        }
    }

    /// Runs one loop iteration: reload if needed, then one frame.
    ///
    /// Returns the recorded slot, if a frame was presented.
    pub fn tick(&mut self, reload: &mut ReloadMachine<TestApp>) -> Option<FrameSlot> {
        if self.target.as_ref().is_some_and(PresentTarget::reload_requested) {
            reload.triggers().raise(Trigger::SurfaceInvalid);
        }
        if let Some(target) = self.target.as_mut() {
            target.extent = self.window_extent;
        }
        match reload.run(self) {
            Ok(ReloadOutcome::Deferred) | Err(_) => return None,
            Ok(_) => {}
        }
        self.frame()
    }

    fn frame(&mut self) -> Option<FrameSlot> {
        let target = self.target.as_mut()?;
        let block = self.block.as_mut()?;
        let slot = self.renderer.begin_frame(target).ok()??;
        let extent = target.extent;
        self.frame.image = self
            .renderer
            .image_index()
            .map(|index| target_image(extent, index));

        if !block.process(slot, &mut self.frame) {
            self.renderer.abandon_frame(target).ok()?;
            return None;
        }
        let presented = self.renderer.end_frame(target, &block.collect_buffers()).ok()?;
        presented.then_some(slot)
    }
}

impl ReloadHost for TestApp {
    type Error = String;

    fn wait_idle(&mut self) -> Result<(), String> {
        self.log.push("wait_idle".to_string());
        self.device.wait_idle().map_err(|err| err.to_string())
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    fn destroy_overlay(&mut self) {
        self.log.push("destroy_overlay".to_string());
        self.frame.overlay = None;
    }

    fn destroy_block(&mut self) {
        self.log.push("destroy_block".to_string());
        if let Some(mut block) = self.block.take() {
            block.destroy();
        }
        self.frame.image = None;
    }

    fn destroy_target(&mut self) {
        self.log.push("destroy_target".to_string());
        self.target = None;
    }

    fn apply_changes(&mut self, request: ReloadRequest) -> Result<(), String> {
        self.log.push("apply_changes".to_string());
        if request.vsync_toggle {
            self.vsync = !self.vsync;
        }
        Ok(())
    }

    fn create_target(&mut self) -> Result<(), String> {
        self.log.push(format!("create_target {}x{}", self.window_extent.width, self.window_extent.height));
        let target = TestTarget::new(self.image_count, self.window_extent);
        self.renderer.reset(target.frame_count());
        self.frame.staging.resize_slots(target.frame_count());
        self.target = Some(target);
        Ok(())
    }

    fn create_block(&mut self) -> Result<(), String> {
        self.log.push("create_block".to_string());
        let frame_count = self.target.as_ref().map_or(0, PresentTarget::frame_count);
        let mut block = FrameBlock::create(self.device.clone(), frame_count, 0)
            .map_err(|err| err.to_string())?;

        register_frame_recorders(&mut block, self.device.clone());
        self.block = Some(block);
        Ok(())
    }

    fn create_overlay(&mut self) -> Result<(), String> {
        self.log.push("create_overlay".to_string());
        let frame_count = self.target.as_ref().map_or(0, PresentTarget::frame_count);
        self.frame.overlay = Some(Overlay::new(
            self.device.allocator(),
            frame_count,
            DRAW_BUFFER_ALIGNMENT,
            Some(OverlayPipeline {
                pipeline: vk::Pipeline::from_raw(1000),
                layout: vk::PipelineLayout::from_raw(1001),
            }),
        ));
        Ok(())
    }
}

/// A started app and its reload machine.
pub fn started_app(image_count: usize) -> (TestApp, ReloadMachine<TestApp>) {
    let mut app = TestApp::new(image_count);
    let mut reload = ReloadMachine::new();
    reload.start(&mut app).expect("initial creation");
    app.log.clear();
    (app, reload)
}
