// Backend module - Vulkan setup layer
//
// Thin wrappers around ash; each owns its handles and destroys them on drop.

pub mod context;
pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;

pub use context::VulkanContext;
pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::Swapchain;
