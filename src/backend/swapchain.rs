// Swapchain - Window presentation
//
// The chain of images handed back and forth with the presentation engine,
// plus one colour view per image.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::device::SwapchainSupportDetails;
use super::{Surface, VulkanDevice};

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        framebuffer: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let support = SwapchainSupportDetails::query(surface, device.physical_device)?;

        let surface_format =
            choose_surface_format(&support.formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, framebuffer);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let (sharing_mode, queue_family_indices) =
            sharing_mode(device.graphics_queue_family, device.present_queue_family);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_loader = khr::Swapchain::new(&device.instance.instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swap chain!")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(anyhow::Error::new(e).context("Failed to get swap chain images"));
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        let image_views = create_image_views(
            &images,
            surface_format.format,
            |info| unsafe { device.device.create_image_view(info, None) },
            |view| unsafe { device.device.destroy_image_view(view, None) },
        );

        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
            device,
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// B8G8R8A8_SRGB with a non-linear sRGB colour space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO // FIFO is always supported
    }
}

/// A current width of `u32::MAX` means the surface lets the swapchain decide,
/// so the framebuffer size is clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;

    vk::Extent2D {
        width: framebuffer.width.max(min.width).min(max.width),
        height: framebuffer.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum; `max_image_count == 0` means no upper bound.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Images are shared between both families only when they differ.
pub fn sharing_mode(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family != present_family {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, vec![])
    }
}

/// Create one 2D colour view per image. If any creation fails, the views
/// made so far are handed to `destroy` before the error is returned.
fn create_image_views(
    images: &[vk::Image],
    format: vk::Format,
    mut create: impl FnMut(&vk::ImageViewCreateInfo) -> VkResult<vk::ImageView>,
    mut destroy: impl FnMut(vk::ImageView),
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        match create(&create_info) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views.drain(..) {
                    destroy(view);
                }
                return Err(anyhow::Error::new(e).context("Failed to create image views!"));
            }
        }
    }

    Ok(views)
}
