// Presentation surface - the connection between Vulkan and a native window

use super::error::{RendererError, Result};
use super::instance::InstanceContext;
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

/// What the renderer needs from a window: native handles for surface
/// creation, and the current framebuffer size in pixels.
pub trait PresentTarget: HasRawWindowHandle + HasRawDisplayHandle {
    fn framebuffer_size(&self) -> (u32, u32);
}

impl PresentTarget for winit::window::Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Everything a surface reports about one adapter
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    // Keeps the instance alive until the surface is destroyed
    _instance: Arc<InstanceContext>,
}

impl Surface {
    pub fn new(instance: Arc<InstanceContext>, window: &dyn PresentTarget) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(RendererError::creation("window surface"))?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            surface,
            loader,
            _instance: instance,
        })
    }

    /// Whether `family` on `physical_device` can present to this surface.
    /// Graphics capability says nothing about this; only the platform knows.
    pub fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
        .map_err(RendererError::creation("surface support query"))
    }

    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(RendererError::creation("surface capabilities query"))?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(RendererError::creation("surface format query"))?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(RendererError::creation("present mode query"))?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
