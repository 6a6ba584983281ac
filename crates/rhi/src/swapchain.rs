//! Swapchain creation and presentation.
//!
//! A [`Swapchain`] is created once per render target and never resized in
//! place: any change of extent, present mode or surface goes through a full
//! destroy and create, driven by the reload state machine.
//!
//! Present mode selection follows [`PresentOptions`]:
//!
//! | vsync | triple_buffer | preferred | fallback |
//! |-------|---------------|-----------|----------|
//! | on    | any           | FIFO      | -        |
//! | off   | on            | MAILBOX   | IMMEDIATE, then FIFO |
//! | off   | off           | IMMEDIATE | FIFO |

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Presentation preferences chosen by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentOptions {
    /// Lock presentation to the display refresh.
    pub vsync: bool,
    /// When not vsynced, prefer a mailbox queue over tearing.
    pub triple_buffer: bool,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            vsync: false,
            triple_buffer: true,
        }
    }
}

/// What the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (image count range, extents, transforms)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / colour space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, images {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan swapchain and its image views.
///
/// Images belong to the swapchain; the views are owned here and destroyed
/// before the swapchain handle.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// `width` and `height` are only used when the surface leaves the extent
    /// up to the application.
    ///
    /// # Errors
    ///
    /// Fails if the surface queries fail, the surface reports a zero extent,
    /// the support is inadequate, or swapchain / image view creation fails.
    /// Partially created views are destroyed before returning.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        options: PresentOptions,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, options);
        let extent = choose_extent(&support.capabilities, width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::SwapchainError(
                "surface has a zero extent".to_string(),
            ));
        }
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let graphics_family = device.graphics_family();
        let present_family = device.present_family();
        let queue_family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, &queue_family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain)? };
        for &image in &this.images {
            let view = create_image_view(&this.device, image, this.format)?;
            this.image_views.push(view);
        }

        info!("Swapchain created with {} images", this.images.len());
        Ok(this)
    }

    /// Acquires the next presentable image, signalling `semaphore`.
    ///
    /// Returns `(image_index, suboptimal)`. `ERROR_OUT_OF_DATE_KHR` is passed
    /// through for the caller to turn into a reload.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns `true` when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of presentable images; fixed for the swapchain's lifetime.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image at `index`, if it exists.
    #[inline]
    pub fn image(&self, index: usize) -> Option<vk::Image> {
        self.images.get(index).copied()
    }

    /// View of the image at `index`, if it exists.
    #[inline]
    pub fn image_view(&self, index: usize) -> Option<vk::ImageView> {
        self.image_views.get(index).copied()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for &view in &self.image_views {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        self.image_views.clear();

        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Prefers B8G8R8A8_SRGB / SRGB_NONLINEAR, then B8G8R8A8_UNORM, then whatever
/// comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let find = |format: vk::Format| {
        formats
            .iter()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        return format;
    }
    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        warn!("Using fallback surface format: B8G8R8A8_UNORM");
        return format;
    }

    warn!("Using first available surface format: {:?}", formats[0].format);
    formats[0]
}

/// Picks the present mode for the given preferences. FIFO is always
/// available, so it is the final fallback.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    options: PresentOptions,
) -> vk::PresentModeKHR {
    if options.vsync {
        return vk::PresentModeKHR::FIFO;
    }

    if options.triple_buffer && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }

    if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }

    debug!("No unsynchronized present mode available, using FIFO");
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent when it is defined, otherwise clamps the
/// requested size to the surface limits.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image above the minimum, bounded by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    unsafe {
        device
            .handle()
            .create_image_view(&create_info, None)
            .map_err(|e| RhiError::SwapchainError(format!("failed to create image view: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODES: [vk::PresentModeKHR; 3] = [
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
    ];

    fn options(vsync: bool, triple_buffer: bool) -> PresentOptions {
        PresentOptions {
            vsync,
            triple_buffer,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_vsync_always_fifo() {
        assert_eq!(
            choose_present_mode(&ALL_MODES, options(true, true)),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&ALL_MODES, options(true, false)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_triple_buffer_prefers_mailbox() {
        assert_eq!(
            choose_present_mode(&ALL_MODES, options(false, true)),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_no_triple_buffer_prefers_immediate() {
        assert_eq!(
            choose_present_mode(&ALL_MODES, options(false, false)),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_present_mode_fallbacks() {
        let fifo_immediate = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&fifo_immediate, options(false, true)),
            vk::PresentModeKHR::IMMEDIATE
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, options(false, true)),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, options(false, false)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn test_determine_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&bounded), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded), 3);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }
}
