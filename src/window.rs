// Window state tracked alongside the winit window

use anyhow::{Context, Result};
use ash::vk;
use glam::DVec2;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

use crate::config::WindowConfig;

pub struct WindowData {
    pub window: Window,
    pub width: u32,
    pub height: u32,
    pub center: DVec2,
}

impl WindowData {
    pub fn create(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;

        let size = window.inner_size();
        log::info!("Window: {}x{} ({})", size.width, size.height, config.title);

        Ok(Self {
            window,
            width: size.width,
            height: size.height,
            center: center_of(size.width, size.height),
        })
    }

    /// Record a new size. Returns false when nothing changed.
    pub fn resize(&mut self, size: PhysicalSize<u32>) -> bool {
        if size.width == self.width && size.height == self.height {
            return false;
        }

        self.width = size.width;
        self.height = size.height;
        self.center = center_of(size.width, size.height);
        true
    }

    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Framebuffer size in pixels, as the swapchain wants it
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

fn center_of(width: u32, height: u32) -> DVec2 {
    DVec2::new(width as f64, height as f64) * 0.5
}
