// Surface - the window's presentation target

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::VulkanInstance;

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface!")?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    /// Can `queue_family` on `physical_device` present to this surface?
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }
        .context("Failed to query surface presentation support")?;

        Ok(supported)
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")?;

        Ok(caps)
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .context("Failed to query surface formats")?;

        Ok(formats)
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        let modes = unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .context("Failed to query surface present modes")?;

        Ok(modes)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
