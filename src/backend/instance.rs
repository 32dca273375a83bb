// Vulkan instance - loader, instance, and optional validation
//
// Owns the root of every other Vulkan object. Wrapped in an Arc so the
// surface and the logical device can keep it alive until they are gone.

use super::error::{RendererError, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

/// Validation layers requested when debug mode is compiled in
pub const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

pub struct InstanceContext {
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl InstanceContext {
    /// Load Vulkan and create an instance able to present to `display`.
    ///
    /// With `enable_validation`, the debug-utils extension and the validation
    /// layers become mandatory; their absence is an unsupported platform.
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }.map_err(|e| {
            RendererError::UnsupportedPlatform(format!("failed to load Vulkan library: {e}"))
        })?;

        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
            .map_err(|e| {
                RendererError::UnsupportedPlatform(format!("no surface support for display: {e}"))
            })?
            .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let required_extensions: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        let available_extensions: Vec<String> = entry
            .enumerate_instance_extension_properties(None)
            .map_err(RendererError::creation("instance extension list"))?
            .iter()
            .map(|props| vk_name(&props.extension_name))
            .collect();
        let missing = missing_names(&required_extensions, &available_extensions);
        if !missing.is_empty() {
            return Err(RendererError::UnsupportedPlatform(format!(
                "missing instance extensions: {}",
                missing.join(", ")
            )));
        }

        let layer_names: Vec<*const c_char> = if enable_validation {
            let available_layers: Vec<String> = entry
                .enumerate_instance_layer_properties()
                .map_err(RendererError::creation("instance layer list"))?
                .iter()
                .map(|props| vk_name(&props.layer_name))
                .collect();
            let missing = missing_names(&VALIDATION_LAYERS, &available_layers);
            if !missing.is_empty() {
                return Err(RendererError::UnsupportedPlatform(format!(
                    "missing validation layers: {}",
                    missing.join(", ")
                )));
            }
            VALIDATION_LAYERS.iter().map(|name| name.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| RendererError::UnsupportedPlatform("application name contains NUL".into()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RendererError::creation("Vulkan instance"))?;

        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            debug_utils,
            instance,
            entry,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(RendererError::creation("debug messenger"))?;

        log::info!("Validation layers enabled");
        Ok((debug_utils, messenger))
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                log::debug!("Destroying debug messenger");
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            log::debug!("Destroying instance");
            self.instance.destroy_instance(None);
        }
    }
}

/// Names from `required` that do not appear in `available`
pub fn missing_names(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy())
        .filter(|name| !available.iter().any(|have| have == name))
        .map(|name| name.into_owned())
        .collect()
}

/// Convert a fixed-size, NUL-terminated Vulkan name field
pub fn vk_name(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

// Routes validation output into the log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
