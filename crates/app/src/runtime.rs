//! Everything the driving loop owns, and how a reload rebuilds it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ash::vk;
use glam::Vec2;
use tracing::{debug, info, trace, warn};
use winit::event_loop::ActiveEventLoop;

use kiln_core::{AppConfig, FrameLimiter, Timer};
use kiln_platform::{InputResult, InputState, KeyCode, Window};
use kiln_renderer::overlay::{OVERLAY_PUSH_CONSTANT_SIZE, OverlayVertex};
use kiln_renderer::shading::is_srgb_format;
use kiln_renderer::{
    CommandBlock, DRAW_BUFFER_ALIGNMENT, FrameContext, FrameSlot, Overlay, OverlayPipeline,
    PresentTarget, RenderTarget, ReloadHost, ReloadRequest, ReloadTriggers, Renderer, ShadingPass,
    TargetOptions, Trigger, register_frame_recorders,
};
use kiln_rhi::RhiResult;
use kiln_rhi::device::Device;
use kiln_rhi::instance::Instance;
use kiln_rhi::physical_device::select_physical_device;
use kiln_rhi::pipeline::{Pipeline, PipelineLayout, ShaderModule, VertexLayout};

use crate::hud::Hud;

const CLEAR_COLOR: [f32; 4] = [0.08, 0.09, 0.11, 1.0];

/// Overlay pipeline objects; dropped together with the overlay.
struct OverlayGpu {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl OverlayGpu {
    fn handles(&self) -> OverlayPipeline {
        OverlayPipeline {
            pipeline: self.pipeline.handle(),
            layout: self.layout.handle(),
        }
    }
}

/// Window, device and the reloadable frame objects.
///
/// Field order is drop order: frame objects, then the target, then the
/// device, window and instance.
pub struct Runtime {
    block: Option<CommandBlock<Device, FrameContext<Arc<Device>>>>,
    frame: FrameContext<Arc<Device>>,
    overlay_gpu: Option<OverlayGpu>,
    target: Option<RenderTarget>,
    renderer: Renderer,
    device: Arc<Device>,
    window: Window,
    instance: Instance,
    config: AppConfig,
    input: InputState,
    quit: Rc<Cell<bool>>,
    overlay_active: Rc<Cell<bool>>,
    limiter: FrameLimiter,
    timer: Timer,
    hud: Rc<RefCell<Hud>>,
}

impl Runtime {
    /// Opens the window and the device. The render target and its
    /// dependents are created by the reload machine's `start`.
    pub fn new(event_loop: &ActiveEventLoop, config: AppConfig, triggers: ReloadTriggers) -> Result<Self> {
        let window = Window::new(event_loop, &config)?;
        let extensions = window.required_extensions()?;
        let instance = Instance::new(config.validation, &extensions)?;

        let physical_device = {
            let surface = window.create_surface(instance.entry(), instance.handle())?;
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?
        };
        info!(
            "Using {} ({})",
            physical_device.device_name(),
            physical_device.device_type_name()
        );
        let device = Device::new(&instance, &physical_device)?;

        let quit = Rc::new(Cell::new(false));
        let overlay_active = Rc::new(Cell::new(true));
        let mut input = InputState::new();
        register_shortcuts(&mut input, triggers, quit.clone(), overlay_active.clone());

        let mut hud = Hud::new();
        hud.set_vsync(config.vsync);
        let hud = Rc::new(RefCell::new(hud));

        // The HUD is untextured and streams its geometry through the overlay
        // draw buffers, so nothing here queues staging uploads.
        let mut frame = FrameContext::new(device.clone(), ShadingPass::new(CLEAR_COLOR));
        frame.set_on_process(build_hud(hud.clone(), overlay_active.clone()));

        Ok(Self {
            block: None,
            frame,
            overlay_gpu: None,
            target: None,
            renderer: Renderer::new(0),
            limiter: FrameLimiter::new(config.fps_cap),
            device,
            window,
            instance,
            config,
            input,
            quit,
            overlay_active,
            timer: Timer::new(),
            hud,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.get()
    }

    /// Turns window and target state into reload triggers.
    pub fn collect_triggers(&mut self, triggers: &ReloadTriggers) {
        if self.window.take_resize_request() {
            triggers.raise(Trigger::Resize);
        }
        if self.window.take_switch_mode_request() {
            triggers.raise(Trigger::ModeSwitch);
        }
        if let Some(target) = self.target.as_mut() {
            target.set_surface_extent(self.window.framebuffer_extent());
            if target.reload_requested() {
                triggers.raise(Trigger::SurfaceInvalid);
            }
        }
    }

    /// Renders one frame if the window is visible and the cap allows it.
    ///
    /// Skipped frames are not errors. Errors are fatal device failures.
    pub fn render(&mut self) -> Result<()> {
        if self.window.is_minimized() {
            std::thread::sleep(Duration::from_millis(1));
            return Ok(());
        }
        if !self.limiter.ready() {
            return Ok(());
        }

        let (Some(target), Some(block)) = (self.target.as_mut(), self.block.as_mut()) else {
            return Ok(());
        };

        let Some(slot) = self.renderer.begin_frame(target)? else {
            return Ok(());
        };
        self.frame.image = self.renderer.image_index().and_then(|index| target.image(index));

        if !block.process(slot, &mut self.frame) {
            self.renderer.abandon_frame(target)?;
            return Ok(());
        }

        let buffers = block.collect_buffers();
        if self.renderer.end_frame(target, &buffers)? {
            self.hud.borrow_mut().push_frame_time(self.timer.delta_secs());
            if self.renderer.frames_presented() % 600 == 0 {
                debug!(fps = self.timer.fps(), "Frame rate");
            }
        }
        Ok(())
    }

    fn target_options(&self) -> TargetOptions {
        TargetOptions {
            vsync: self.config.vsync,
            triple_buffer: self.config.triple_buffer,
        }
    }

    fn frame_count(&self) -> usize {
        self.target.as_ref().map_or(0, PresentTarget::frame_count)
    }

    /// Loads the overlay shaders; missing shader files leave the overlay
    /// without a pipeline.
    fn create_overlay_gpu(&self, format: vk::Format) -> Result<Option<OverlayGpu>> {
        let vert_path = self.config.shader_dir.join("overlay.vert.spv");
        let frag_path = self.config.shader_dir.join("overlay.frag.spv");
        if !vert_path.exists() || !frag_path.exists() {
            warn!(
                "Overlay shaders not found in {}; overlay disabled",
                self.config.shader_dir.display()
            );
            return Ok(None);
        }

        let vert = ShaderModule::from_file(self.device.clone(), &vert_path)?;
        let frag = ShaderModule::from_file(self.device.clone(), &frag_path)?;
        let layout = PipelineLayout::with_push_constants(self.device.clone(), OVERLAY_PUSH_CONSTANT_SIZE)?;
        let attributes = OverlayVertex::attribute_descriptions();
        let pipeline = Pipeline::overlay(
            self.device.clone(),
            &layout,
            &vert,
            &frag,
            VertexLayout {
                binding: OverlayVertex::binding_description(),
                attributes: &attributes,
            },
            format,
        )?;

        Ok(Some(OverlayGpu { pipeline, layout }))
    }

    /// Called by the reload machine after every (re)creation.
    pub fn refresh_title(&mut self) -> bool {
        let Some(target) = self.target.as_ref() else {
            return false;
        };
        let extent = target.extent();
        self.window.set_title(&format!(
            "{} - {}x{} - vsync {}",
            self.config.title,
            extent.width,
            extent.height,
            if self.config.vsync { "on" } else { "off" }
        ));
        self.hud.borrow_mut().set_vsync(self.config.vsync);
        true
    }
}

impl ReloadHost for Runtime {
    type Error = anyhow::Error;

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle().context("waiting for the device to idle")
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.window.framebuffer_extent()
    }

    fn destroy_overlay(&mut self) {
        if let Some(overlay) = self.frame.overlay.take() {
            let stats = overlay.stats();
            debug!(
                allocations = stats.allocations,
                failures = stats.failures,
                skipped = stats.skipped,
                "Overlay destroyed"
            );
        }
        self.overlay_gpu = None;
    }

    fn destroy_block(&mut self) {
        if let Some(mut block) = self.block.take() {
            block.destroy();
        }
        self.frame.image = None;
    }

    fn destroy_target(&mut self) {
        if let Some(mut target) = self.target.take() {
            target.destroy();
        }
    }

    fn apply_changes(&mut self, request: ReloadRequest) -> Result<()> {
        if request.vsync_toggle {
            self.config.vsync = !self.config.vsync;
            info!(vsync = self.config.vsync, "Vsync toggled");
        }
        if request.mode_switch {
            let fullscreen = !self.window.fullscreen();
            self.window.set_fullscreen(fullscreen);
            self.config.fullscreen = fullscreen;
        }
        Ok(())
    }

    fn create_target(&mut self) -> Result<()> {
        let surface = self
            .window
            .create_surface(self.instance.entry(), self.instance.handle())?;
        let target = RenderTarget::create(
            &self.instance,
            self.device.clone(),
            surface,
            self.window.framebuffer_extent(),
            self.target_options(),
        )
        .context("creating render target")?;

        let frame_count = target.frame_count();
        self.renderer.reset(frame_count);
        self.frame.staging.resize_slots(frame_count);
        self.target = Some(target);
        Ok(())
    }

    fn create_block(&mut self) -> Result<()> {
        let mut block = CommandBlock::create(
            self.device.clone(),
            self.frame_count(),
            self.device.graphics_family(),
        )
        .context("creating command block")?;

        register_frame_recorders(&mut block, self.device.clone());

        trace!(recorders = ?block.names().collect::<Vec<_>>(), "Command block ready");
        self.block = Some(block);
        Ok(())
    }

    fn create_overlay(&mut self) -> Result<()> {
        let format = self
            .target
            .as_ref()
            .map(RenderTarget::format)
            .context("overlay needs a render target")?;
        let gpu = self.create_overlay_gpu(format)?;
        let alignment = DRAW_BUFFER_ALIGNMENT.max(self.device.non_coherent_atom_size());

        let mut overlay = Overlay::new(
            self.device.clone(),
            self.frame_count(),
            alignment,
            gpu.as_ref().map(OverlayGpu::handles),
        );
        overlay.context_mut().set_active(self.overlay_active.get());

        self.frame.overlay = Some(overlay);
        self.overlay_gpu = gpu;
        Ok(())
    }
}

/// Per-frame hook: rebuilds the HUD at the acquired image's extent.
fn build_hud(
    hud: Rc<RefCell<Hud>>,
    overlay_active: Rc<Cell<bool>>,
) -> impl FnMut(vk::CommandBuffer, FrameSlot, &mut FrameContext<Arc<Device>>) -> RhiResult<()> {
    move |_cmd, _slot, frame| {
        let (Some(image), Some(overlay)) = (frame.image, frame.overlay.as_mut()) else {
            return Ok(());
        };
        let context = overlay.context_mut();
        context.set_active(overlay_active.get());
        hud.borrow().build(
            context,
            Vec2::new(image.extent.width as f32, image.extent.height as f32),
            is_srgb_format(image.format),
        );
        Ok(())
    }
}

/// Keyboard shortcuts. Listeners hold shared handles, never the runtime.
fn register_shortcuts(
    input: &mut InputState,
    triggers: ReloadTriggers,
    quit: Rc<Cell<bool>>,
    overlay_active: Rc<Cell<bool>>,
) {
    let listeners = input.key_listeners();

    listeners.add(move |event| {
        if event.is_alt_press(KeyCode::Enter) {
            triggers.raise(Trigger::ModeSwitch);
        } else if event.is_alt_press(KeyCode::Backspace) {
            triggers.raise(Trigger::VsyncToggle);
        } else {
            return InputResult::Ignored;
        }
        InputResult::Handled
    });

    listeners.add(move |event| {
        if event.is_ctrl_press(KeyCode::KeyQ) {
            quit.set(true);
            return InputResult::Handled;
        }
        InputResult::Ignored
    });

    listeners.add(move |event| {
        if event.is_ctrl_press(KeyCode::Tab) {
            overlay_active.set(!overlay_active.get());
            return InputResult::Handled;
        }
        InputResult::Ignored
    });
}
