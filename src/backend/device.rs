// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (must present to our surface, prefer discrete GPU)
// - Logical device + graphics/present queue creation

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::instance::{extension_name, missing_names};
use super::{Surface, VulkanInstance};

/// Device extensions every candidate GPU must expose
pub fn device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue families we need, as found by [`QueueFamilyIndices::find`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan `families` in order. The first family with graphics support and
    /// the first one that can present are taken; the scan stops as soon as
    /// both are known.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }

            if indices.present.is_none() && supports_present(index)? {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, ascending
    pub fn unique(&self) -> Vec<u32> {
        self.graphics
            .into_iter()
            .chain(self.present)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// What a surface offers a given physical device
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        Ok(Self {
            capabilities: surface.capabilities(physical_device)?,
            formats: surface.formats(physical_device)?,
            present_modes: surface.present_modes(physical_device)?,
        })
    }

    /// A swapchain needs at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Keeps the instance alive until the device is gone
    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    /// Pick a GPU that can present to `surface` and open a logical device on it.
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface) -> Result<Arc<Self>> {
        let (physical_device, indices) = Self::pick_physical_device(&instance, surface)?;

        let graphics_queue_family = indices
            .graphics
            .context("Selected GPU has no graphics queue family")?;
        let present_queue_family = indices
            .present
            .context("Selected GPU has no present queue family")?;

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            graphics_queue_family,
            present_queue_family
        );

        let device = Self::create_logical_device(&instance, physical_device, &indices)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        Ok(Arc::new(Self {
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            instance,
        }))
    }

    fn pick_physical_device(
        instance: &VulkanInstance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("Failed to find GPUs with Vulkan support!");
        }

        let mut candidates = Vec::new();

        for device in devices {
            let Some(indices) = Self::check_suitability(instance, surface, device)? else {
                continue;
            };

            let props = unsafe { instance.instance.get_physical_device_properties(device) };
            candidates.push(((device, indices), props.device_type));
        }

        select_best(candidates).ok_or_else(|| anyhow::anyhow!("Failed to find a suitable GPU!"))
    }

    /// Queue families if `device` is usable for presenting to `surface`.
    fn check_suitability(
        instance: &VulkanInstance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilyIndices>> {
        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };
        let indices =
            QueueFamilyIndices::find(&families, |index| surface.supports_present(device, index))?;

        if !indices.is_complete() {
            log::debug!("Skipping {:?}: missing graphics or present queue", device);
            return Ok(None);
        }

        let missing = Self::missing_device_extensions(instance, device)?;
        if !missing.is_empty() {
            log::debug!("Skipping {:?}: missing extensions {:?}", device, missing);
            return Ok(None);
        }

        // Only safe to query once VK_KHR_swapchain is known to be there
        let support = SwapchainSupportDetails::query(surface, device)?;
        if !support.is_adequate() {
            log::debug!("Skipping {:?}: no surface formats or present modes", device);
            return Ok(None);
        }

        Ok(Some(indices))
    }

    fn missing_device_extensions(
        instance: &VulkanInstance,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<String>> {
        let properties = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(device)
        }
        .context("Failed to enumerate device extensions")?;

        let available: Vec<&CStr> = properties.iter().map(extension_name).collect();

        Ok(missing_names(&device_extensions(), &available))
    }

    fn create_logical_device(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        indices: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = indices
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Nothing optional is needed yet
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device!")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        warn_if_not_idle(self.wait_idle(), "before destruction");

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// Teardown carries on either way; a failed idle wait is only reported.
/// Returns whether the device went idle.
pub fn warn_if_not_idle(result: Result<()>, stage: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Device did not go idle {}: {:#}", stage, e);
            false
        }
    }
}

/// Highest-scoring candidate; on a tie the earlier one is kept.
fn select_best<T>(candidates: impl IntoIterator<Item = (T, vk::PhysicalDeviceType)>) -> Option<T> {
    let mut best = None;
    let mut best_score = 0;

    for (candidate, device_type) in candidates {
        let score = device_type_score(device_type);
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }

    best
}

/// Discrete beats integrated beats everything else.
fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_family_does_both() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn separate_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 2)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index >= 1)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn scan_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let asked = RefCell::new(Vec::new());

        let indices = QueueFamilyIndices::find(&families, |index| {
            asked.borrow_mut().push(index);
            Ok(true)
        })
        .unwrap();

        assert!(indices.is_complete());
        assert_eq!(asked.borrow().as_slice(), &[0]);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| {
            Err(vk::Result::ERROR_SURFACE_LOST_KHR.into())
        });

        assert!(result.is_err());
    }

    #[test]
    fn empty_family_list_finds_nothing() {
        let indices = QueueFamilyIndices::find(&[], |_| Ok(true)).unwrap();
        assert_eq!(indices, QueueFamilyIndices::default());
        assert!(indices.unique().is_empty());
    }

    #[test]
    fn swapchain_support_needs_formats_and_modes() {
        let mut support = SwapchainSupportDetails::default();
        assert!(!support.is_adequate());

        support.formats.push(vk::SurfaceFormatKHR::default());
        assert!(!support.is_adequate());

        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }

    #[test]
    fn discrete_gpu_scores_highest() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
        assert!(device_type_score(vk::PhysicalDeviceType::OTHER) > 0);
    }

    #[test]
    fn graphics_family_is_not_moved_to_the_present_family() {
        // [G, G+P]: graphics stays on family 0, so sharing ends up concurrent
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 1)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn failed_idle_wait_is_reported_not_raised() {
        assert!(warn_if_not_idle(Ok(()), "during cleanup"));
        assert!(!warn_if_not_idle(
            Err(vk::Result::ERROR_DEVICE_LOST.into()),
            "during cleanup"
        ));
    }

    #[test]
    fn first_discrete_gpu_is_selected() {
        let chosen = select_best([
            ("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            ("discrete-a", vk::PhysicalDeviceType::DISCRETE_GPU),
            ("discrete-b", vk::PhysicalDeviceType::DISCRETE_GPU),
        ]);
        assert_eq!(chosen, Some("discrete-a"));
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let chosen = select_best([
            ("cpu", vk::PhysicalDeviceType::CPU),
            ("virtual", vk::PhysicalDeviceType::VIRTUAL_GPU),
        ]);
        assert_eq!(chosen, Some("cpu"));
    }

    #[test]
    fn integrated_beats_other_types() {
        let chosen = select_best([
            ("virtual", vk::PhysicalDeviceType::VIRTUAL_GPU),
            ("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ]);
        assert_eq!(chosen, Some("integrated"));
    }

    #[test]
    fn no_candidates_selects_nothing() {
        let chosen = select_best(Vec::<(u32, vk::PhysicalDeviceType)>::new());
        assert_eq!(chosen, None);
    }

    #[test]
    fn swapchain_is_the_only_device_extension() {
        assert_eq!(device_extensions(), [c"VK_KHR_swapchain"]);
    }
}
