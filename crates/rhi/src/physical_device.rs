//! Physical device (GPU) selection.
//!
//! A device qualifies when it has graphics and present queues for the
//! window's surface, supports Vulkan 1.3 with dynamic rendering, exposes the
//! swapchain extension and reports at least one surface format and present
//! mode. Among qualifying devices, discrete GPUs win.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Queue family indices used by the frame loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Family that can present to the surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics_family, self.present_family]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// A physical device that passed the suitability checks.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Queue families used for rendering and presentation.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable name for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for presenting to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .max_by_key(rate_device);

    match best {
        Some(info) => {
            info!(
                "Selected GPU: '{}' ({})",
                info.device_name(),
                info.device_type_name()
            );
            Ok(info)
        }
        None => {
            warn!("No suitable GPU found with required capabilities");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

    if !supports_api_1_3(properties.api_version) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", name);
        return None;
    }

    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    if features_1_3.dynamic_rendering == vk::FALSE {
        debug!("GPU '{}' skipped: dynamic rendering not supported", name);
        return None;
    }

    let has_swapchain = unsafe { instance.enumerate_device_extension_properties(device) }
        .map(|extensions| has_extension(&extensions, ash::khr::swapchain::NAME))
        .unwrap_or(false);
    if !has_swapchain {
        debug!("GPU '{}' skipped: no swapchain extension", name);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    let adequate = SwapchainSupportDetails::query(device, surface, surface_loader)
        .map(|support| support.is_adequate())
        .unwrap_or(false);
    if !adequate {
        debug!("GPU '{}' skipped: inadequate surface support", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        queue_families,
    })
}

fn supports_api_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

/// Prefers a single family that does both graphics and present.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    type_score + info.properties.limits.max_image_dimension2_d
}

/// Whether `name` is among the reported device extensions.
fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions
        .iter()
        .any(|ext| (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_unique_families_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_unique_families_split() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![1, 2]);
    }

    #[test]
    fn test_supports_api_1_3() {
        assert!(supports_api_1_3(vk::API_VERSION_1_3));
        assert!(!supports_api_1_3(vk::API_VERSION_1_2));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 0)));
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let make = |device_type| PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                ..Default::default()
            },
            queue_families: QueueFamilyIndices::default(),
        };
        assert!(
            rate_device(&make(vk::PhysicalDeviceType::DISCRETE_GPU))
                > rate_device(&make(vk::PhysicalDeviceType::INTEGRATED_GPU))
        );
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn test_has_extension_matches_exact_name() {
        let extensions = [
            extension(c"VK_KHR_maintenance1"),
            extension(ash::khr::swapchain::NAME),
        ];
        assert!(has_extension(&extensions, ash::khr::swapchain::NAME));
        assert!(!has_extension(&extensions[..1], ash::khr::swapchain::NAME));
        assert!(!has_extension(&[], ash::khr::swapchain::NAME));
    }
}
