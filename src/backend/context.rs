// Vulkan Context - every handle the application owns, in creation order
//
// instance -> surface -> physical/logical device -> swapchain
//
// Fields are declared in reverse creation order so the default drop order
// tears everything down in reverse.

use anyhow::Result;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::device::warn_if_not_idle;
use super::instance::InstanceDesc;
use super::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;

pub struct VulkanContext {
    swapchain: Option<Swapchain>,
    pub device: Arc<VulkanDevice>,
    pub surface: Surface,
    pub instance: Arc<VulkanInstance>,
    preferred_present_mode: vk::PresentModeKHR,
}

impl VulkanContext {
    pub fn new<W>(window: &W, framebuffer: vk::Extent2D, config: &Config) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Initializing Vulkan...");

        let desc = InstanceDesc {
            app_name: &config.application.name,
            engine_name: &config.application.engine_name,
            enable_validation: config.enable_validation(),
        };
        let instance = Arc::new(VulkanInstance::new(&desc, window.raw_display_handle())?);

        let surface = Surface::new(instance.clone(), window)?;
        let device = VulkanDevice::new(instance.clone(), &surface)?;

        let mut context = Self {
            swapchain: None,
            device,
            surface,
            instance,
            preferred_present_mode: config.preferred_present_mode(),
        };
        context.create_swapchain(framebuffer)?;

        log::info!("Vulkan initialized successfully!");
        Ok(context)
    }

    /// `None` while the window is minimised.
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Throw the swapchain away and build one for the new framebuffer size.
    pub fn recreate_swapchain(&mut self, framebuffer: vk::Extent2D) -> Result<()> {
        self.device.wait_idle()?;
        self.create_swapchain(framebuffer)
    }

    fn create_swapchain(&mut self, framebuffer: vk::Extent2D) -> Result<()> {
        // The surface can only have one swapchain at a time
        self.swapchain = None;

        if framebuffer.width == 0 || framebuffer.height == 0 {
            log::info!("Framebuffer is empty, deferring swapchain creation");
            return Ok(());
        }

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            framebuffer,
            self.preferred_present_mode,
        )?;

        self.swapchain = Some(swapchain);
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        warn_if_not_idle(self.device.wait_idle(), "during cleanup");
    }
}
