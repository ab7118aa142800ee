// Vulkan Instance - connection to the Vulkan runtime
//
// Responsibilities:
// - Loading the Vulkan library
// - Checking required instance extensions and layers are present
// - Instance creation (with validation layers in debug builds)
// - Debug messenger that routes validation output into `log`

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

/// Application identity passed to the driver
pub struct InstanceDesc<'a> {
    pub app_name: &'a str,
    pub engine_name: &'a str,
    pub enable_validation: bool,
}

/// Vulkan instance wrapper with automatic cleanup
pub struct VulkanInstance {
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
    /// Instance extensions that were enabled at creation
    pub extensions: Vec<&'static CStr>,
}

impl VulkanInstance {
    pub fn new(desc: &InstanceDesc, display_handle: RawDisplayHandle) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", desc.app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let extensions = required_instance_extensions(display_handle, desc.enable_validation)?;
        check_instance_extension_support(&entry, &extensions)?;

        if desc.enable_validation {
            check_validation_layer_support(&entry)?;
        }

        let instance = Self::create_instance(&entry, desc, &extensions)?;

        let debug_utils = if desc.enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
            extensions,
        })
    }

    fn create_instance(
        entry: &Entry,
        desc: &InstanceDesc,
        extensions: &[&CStr],
    ) -> Result<ash::Instance> {
        let app_name = CString::new(desc.app_name)?;
        let engine_name = CString::new(desc.engine_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let layer_names: Vec<*const c_char> = if desc.enable_validation {
            VALIDATION_LAYERS.iter().map(|name| name.as_ptr()).collect()
        } else {
            vec![]
        };

        // Chained so that vkCreateInstance/vkDestroyInstance are also validated
        let mut debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        if desc.enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create VkInstance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = debug_messenger_create_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger!")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Surface extensions for the current windowing system, plus debug utils
/// when validation is on.
pub fn required_instance_extensions(
    display_handle: RawDisplayHandle,
    enable_validation: bool,
) -> Result<Vec<&'static CStr>> {
    let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
        .context("Failed to query surface extensions for this window system")?;

    // SAFETY: ash-window hands out pointers to static nul-terminated names
    let mut extensions: Vec<&'static CStr> = surface_extensions
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect();

    if enable_validation {
        extensions.push(DebugUtils::name());
    }

    Ok(extensions)
}

/// Returns the entries of `required` that are not in `available`.
pub fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|&&name| !available.contains(&name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

pub fn extension_name(props: &vk::ExtensionProperties) -> &CStr {
    // SAFETY: the driver fills this with a nul-terminated string
    unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }
}

fn layer_name(props: &vk::LayerProperties) -> &CStr {
    // SAFETY: the driver fills this with a nul-terminated string
    unsafe { CStr::from_ptr(props.layer_name.as_ptr()) }
}

fn check_instance_extension_support(entry: &Entry, required: &[&CStr]) -> Result<()> {
    let properties = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?;

    let available: Vec<&CStr> = properties.iter().map(extension_name).collect();

    log::debug!("Available instance extensions:");
    for name in &available {
        log::debug!("\t{}", name.to_string_lossy());
    }

    let missing = missing_names(required, &available);
    if !missing.is_empty() {
        anyhow::bail!(
            "Failed to create VkInstance: missing instance extensions {:?}",
            missing
        );
    }

    Ok(())
}

fn check_validation_layer_support(entry: &Entry) -> Result<()> {
    let properties = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;

    let available: Vec<&CStr> = properties.iter().map(layer_name).collect();

    if !missing_names(&VALIDATION_LAYERS, &available).is_empty() {
        anyhow::bail!("Validation layers requested, but not available!");
    }

    Ok(())
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        _ => log::Level::Debug,
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }

    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::log!(
        severity_level(message_severity),
        "[Vulkan] {}",
        message.to_string_lossy()
    );

    vk::FALSE
}
