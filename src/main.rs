// =============================================================================
// VULKAN PROJECT - instance, device and swapchain bring-up
// =============================================================================
//
// SETUP ORDER (teardown is the exact reverse):
// 1. Window
// 2. Instance (+ debug messenger when validation is on)
// 3. Surface
// 4. Physical device -> logical device + graphics/present queues
// 5. Swapchain + image views
//
// After that the app only processes window events until it is closed.
//
// =============================================================================

mod backend;
mod config;
mod window;

use anyhow::{Context, Result};
use backend::VulkanContext;
use config::Config;
use std::fs::OpenOptions;
use std::io::Write;
use window::WindowData;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, source) = Config::load();

    init_logging(&config)?;
    log::info!("Starting Vulkan project");
    source.report();
    log::debug!("Config: {:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.error.take() {
        log::error!("Fatal: {:#}", e);
        return Err(e);
    }

    log::info!("Exited cleanly");
    Ok(())
}

/// Initialize logging, optionally redirected into a file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG still wins over the config file
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;

        writeln!(file, "=== Vulkan Project Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the Vulkan context has to go before the
/// window its surface was created from.
struct App {
    context: Option<VulkanContext>,
    window: Option<WindowData>,
    config: Config,
    /// First fatal error; surfaced from `main` once the loop has exited
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            context: None,
            window: None,
            config,
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = WindowData::create(event_loop, &self.config.window)?;

        let context = VulkanContext::new(&window.window, window.framebuffer_extent(), &self.config)
            .context("Failed to initialize Vulkan")?;

        log::info!("Instance extensions: {:?}", context.instance.extensions);
        log::info!(
            "Queues: graphics {:?} (family {}), present {:?} (family {})",
            context.device.graphics_queue,
            context.device.graphics_queue_family,
            context.device.present_queue,
            context.device.present_queue_family
        );

        if let Some(swapchain) = context.swapchain() {
            log::info!(
                "Swapchain ready: {} images / {} views, {:?}, {}x{}, {:?}",
                swapchain.images.len(),
                swapchain.image_views.len(),
                swapchain.format,
                swapchain.extent.width,
                swapchain.extent.height,
                swapchain.present_mode
            );
        }

        self.context = Some(context);
        self.window = Some(window);
        Ok(())
    }

    fn handle_resize(&mut self, size: winit::dpi::PhysicalSize<u32>) -> Result<()> {
        let (Some(window), Some(context)) = (self.window.as_mut(), self.context.as_mut()) else {
            return Ok(());
        };

        if !window.resize(size) {
            return Ok(());
        }

        log::debug!(
            "Window resized to {}x{} (center {:?})",
            window.width,
            window.height,
            window.center
        );

        if window.is_minimized() {
            log::debug!("Window minimized");
        }

        context.recreate_swapchain(window.framebuffer_extent())
    }

    /// Record the error and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Err(e) = self.handle_resize(size) {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Vulkan first, then the window it presents to
        self.context = None;
        self.window = None;
        log::info!("Cleanup complete");
    }
}
