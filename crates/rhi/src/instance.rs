//! Vulkan instance management.
//!
//! Creates the VkInstance with the extensions the window system needs and,
//! optionally, the Khronos validation layer. Validation messages are routed
//! into `tracing` so they show up next to the frame loop's own logs.

use std::borrow::Cow;
use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance with optional debug messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// `surface_extensions` are the platform surface extensions reported by
    /// the window system (see `ash_window::enumerate_required_extensions`).
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded or instance
    /// creation fails. A missing validation layer is only a warning.
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && is_validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"kiln")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"kiln")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = required_extensions(surface_extensions);
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created (API 1.3, {} extension(s))",
            extensions.len()
        );

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match setup_debug_messenger(&loader) {
                Ok(messenger) => {
                    info!("Validation layers enabled");
                    Some((loader, messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Surface extension plus the platform ones, without duplicates.
fn required_extensions(surface_extensions: &[*const c_char]) -> Vec<*const c_char> {
    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];
    for &ext in surface_extensions {
        let name = unsafe { CStr::from_ptr(ext) };
        let duplicate = extensions
            .iter()
            .any(|&known| unsafe { CStr::from_ptr(known) } == name);
        if !duplicate {
            extensions.push(ext);
        }
    }
    extensions
}

fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
    let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

    Ok(available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    }))
}

fn setup_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
    Ok(messenger)
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid (or null) callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(kind = ?message_type, "[vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(kind = ?message_type, "[vulkan] {}", message);
        }
        _ => {
            debug!(kind = ?message_type, "[vulkan] {}", message);
        }
    }

    vk::FALSE
}
