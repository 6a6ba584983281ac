//! Window management using winit.
//!
//! Besides owning the native window, [`Window`] is the presentation surface
//! the frame loop consults every iteration: it reports the current
//! framebuffer extent and carries the resize / mode-switch requests the
//! reload machine consumes.

use std::cell::Cell;
use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window as WinitWindow, WindowAttributes};

use kiln_core::{AppConfig, Error, Result};

/// RAII wrapper for a Vulkan surface.
///
/// The Vulkan instance must outlive this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader used to query capabilities, formats and present modes.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as the loader; destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Application window and presentation surface state.
pub struct Window {
    window: Arc<WinitWindow>,
    resize_requested: Cell<bool>,
    switch_mode_requested: Cell<bool>,
}

impl Window {
    /// Creates the window described by `config`.
    pub fn new(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self> {
        let mut attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);
        if config.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(
            "Window created: {}x{}{}",
            config.width,
            config.height,
            if config.fullscreen { " (fullscreen)" } else { "" }
        );

        Ok(Self {
            window: Arc::new(window),
            resize_requested: Cell::new(false),
            switch_mode_requested: Cell::new(false),
        })
    }

    /// Current framebuffer size in pixels; zero while minimized on most
    /// platforms.
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    /// Whether the window is iconified or has no drawable area.
    pub fn is_minimized(&self) -> bool {
        let extent = self.framebuffer_extent();
        extent.width == 0 || extent.height == 0 || self.window.is_minimized().unwrap_or(false)
    }

    /// Whether the window is currently fullscreen.
    pub fn fullscreen(&self) -> bool {
        self.window.fullscreen().is_some()
    }

    /// Switches between windowed and borderless fullscreen.
    pub fn set_fullscreen(&self, fullscreen: bool) {
        let mode = fullscreen.then_some(Fullscreen::Borderless(None));
        self.window.set_fullscreen(mode);
        tracing::info!(fullscreen, "Window mode changed");
    }

    /// Records that the framebuffer size changed.
    pub fn request_resize(&self) {
        self.resize_requested.set(true);
    }

    /// Returns and clears the pending resize request.
    pub fn take_resize_request(&self) -> bool {
        self.resize_requested.replace(false)
    }

    /// Records that the user asked for a windowed/fullscreen switch.
    pub fn request_switch_mode(&self) {
        self.switch_mode_requested.set(true);
    }

    /// Returns and clears the pending mode-switch request.
    pub fn take_switch_mode_request(&self) -> bool {
        self.switch_mode_requested.replace(false)
    }

    /// Updates the title bar text.
    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Requests a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Platform surface extensions the instance must enable.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        required_extensions(display_handle.as_raw())
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window handles are unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are valid; handles come from the live
        // winit window. Surface::drop destroys the result.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

/// Vulkan extensions needed to create a surface for `display_handle`.
///
/// The returned pointers reference static strings owned by `ash_window`.
pub fn required_extensions(
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate required extensions: {}", e)))?;

    tracing::debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns valid, null-terminated static strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
