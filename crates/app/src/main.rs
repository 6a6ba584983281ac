//! kiln - frame lifecycle demo
//!
//! Opens a window, drives the begin/process/end frame loop and rebuilds the
//! render target whenever the window is resized, switches between windowed
//! and fullscreen (Alt+Enter or F11), or vsync is toggled (Alt+Backspace).
//! Ctrl+Tab hides the frame-time overlay, Ctrl+Q quits.

mod hud;
mod runtime;

use std::error::Error;

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use kiln_core::AppConfig;
use kiln_renderer::{FrameError, ReloadMachine, ReloadOutcome};
use kiln_rhi::RhiError;

use runtime::Runtime;

struct Running {
    reload: ReloadMachine<Runtime>,
    runtime: Runtime,
}

impl Running {
    fn start(event_loop: &ActiveEventLoop, config: AppConfig) -> Result<Self> {
        let mut reload = ReloadMachine::new();
        let mut runtime = Runtime::new(event_loop, config, reload.triggers())?;

        reload.on_create(Runtime::refresh_title);
        reload.on_destroy(|_: &mut Runtime| info!("Tearing down render target"));
        reload.start(&mut runtime)?;

        Ok(Self { reload, runtime })
    }

    /// One loop iteration. Returns false when the loop should stop.
    fn iterate(&mut self) -> bool {
        let triggers = self.reload.triggers();
        self.runtime.collect_triggers(&triggers);

        match self.reload.run(&mut self.runtime) {
            Ok(ReloadOutcome::Reloaded(request)) => info!(?request, "Render target reloaded"),
            Ok(ReloadOutcome::Idle | ReloadOutcome::Deferred) => {}
            Err(e) if is_device_lost(&e) => {
                error!("Device lost during reload, exiting: {e:#}");
                return false;
            }
            Err(e) => {
                error!("Reload failed, exiting: {e:#}");
                return false;
            }
        }

        if let Err(e) = self.runtime.render() {
            if is_device_lost(&*e) {
                error!("Device lost, exiting: {e:#}");
            } else {
                error!("Frame failed, exiting: {e:#}");
            }
            return false;
        }

        !self.runtime.quit_requested()
    }
}

/// A lost device cannot be recovered by rebuilding the render target.
fn is_device_lost(err: &(dyn Error + 'static)) -> bool {
    std::iter::successors(Some(err), |&cause| cause.source()).any(|cause| {
        cause
            .downcast_ref::<FrameError>()
            .is_some_and(FrameError::is_device_lost)
            || cause
                .downcast_ref::<RhiError>()
                .is_some_and(RhiError::is_device_lost)
    })
}

impl Drop for Running {
    fn drop(&mut self) {
        self.reload.shutdown(&mut self.runtime);
    }
}

struct App {
    config: Option<AppConfig>,
    running: Option<Running>,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config: Some(config),
            running: None,
        }
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        self.running = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(config) = self.config.take() else {
            return;
        };

        match Running::start(event_loop, config) {
            Ok(running) => {
                info!("Initialization complete, entering main loop");
                self.running = Some(running);
            }
            Err(e) => {
                error!("Failed to start: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let runtime = &mut running.runtime;

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.stop(event_loop);
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                runtime.window().request_resize();
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                runtime.input_mut().set_modifiers(modifiers.state().into());
            }
            WindowEvent::Focused(false) => runtime.input_mut().release_all(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    let pressed = event.state.is_pressed();
                    if key == KeyCode::F11 && pressed && !event.repeat {
                        runtime.window().request_switch_mode();
                    }
                    runtime.input_mut().handle_key(key, pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                if !running.iterate() {
                    self.stop(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_ref() {
            running.runtime.window().request_redraw();
        }
    }
}

fn main() -> Result<()> {
    kiln_core::init_logging();

    let config = AppConfig::from_env()?;
    info!(
        vsync = config.vsync,
        triple_buffer = config.triple_buffer,
        fps_cap = config.fps_cap,
        "Starting {}",
        config.title
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    fn lost() -> RhiError {
        RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
    }

    #[test]
    fn test_device_lost_from_frame_error() {
        let err = anyhow::Error::from(FrameError::Rhi(lost()));
        assert!(is_device_lost(&*err));
    }

    #[test]
    fn test_device_lost_behind_context() {
        let err = anyhow::Error::from(lost()).context("waiting for the device to idle");
        assert!(is_device_lost(&*err));
    }

    #[test]
    fn test_other_failures_are_not_device_loss() {
        let err = anyhow::Error::from(FrameError::NoFrameAcquired);
        assert!(!is_device_lost(&*err));
        let err = anyhow::Error::from(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(!is_device_lost(&*err));
    }
}
