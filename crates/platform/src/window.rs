//! Winit window wrapper and Vulkan surface creation.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use aurora_core::{Error, Result};

/// RAII wrapper over a `vk::SurfaceKHR`.
///
/// The instance the surface was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for surface capability and format queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window::create_surface
        // from the same instance the loader wraps, and is destroyed
        // nowhere else.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("surface destroyed");
    }
}

/// Application window with the framebuffer size the renderer tracks.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|err| Error::Window(err.to_string()))?;

        tracing::info!("window created at {width}x{height}");

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Records a new framebuffer size from a resize event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates the Vulkan surface for this window.
    ///
    /// The returned [`Surface`] destroys itself; `instance` must outlive
    /// it.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|err| Error::Window(format!("no display handle: {err}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|err| Error::Window(format!("no window handle: {err}")))?;

        // SAFETY: handles come from a live winit window; entry and
        // instance are valid for the duration of the call.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|err| Error::Graphics(format!("surface creation failed: {err}")))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::debug!("surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}
