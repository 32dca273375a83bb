// Swap ring - the presentable images cycled with the present engine
//
// Negotiation is split into pure functions over what the surface reports,
// so every choice below can be checked without a GPU. The ring itself owns
// the swapchain and one view per image; the images belong to the present
// engine and are only borrowed between acquire and present.

use super::device::{DeviceContext, QueueFamilies};
use super::error::{RendererError, Result};
use super::surface::{Surface, SurfaceSupport};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

/// Chosen when the surface does not restrict formats at all
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Negotiated swap ring parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRingConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapRingConfig {
    /// `framebuffer_size` is only consulted when the surface lets the
    /// window decide the extent.
    pub fn negotiate(support: &SurfaceSupport, framebuffer_size: (u32, u32)) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            RendererError::UnsupportedPlatform("surface reports no formats".into())
        })?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Pick the color format and space for the ring.
///
/// A lone `UNDEFINED` entry means any format is fine. Otherwise prefer 8-bit
/// RGBA or BGRA in non-linear sRGB, and settle for the first entry if neither
/// is offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_FORMAT);
        }
    }

    formats
        .iter()
        .find(|f| {
            matches!(
                f.format,
                vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM
            ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when offered, else FIFO (always supported, vsync-locked)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's fixed extent, or the framebuffer size clamped into bounds
/// when the surface reports the `u32::MAX` "follow the window" value.
/// Inverted bounds resolve to the maximum rather than panicking.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// Concurrent sharing across both families when they differ, exclusive otherwise
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.presentation],
        )
    }
}

pub struct SwapRing {
    pub swapchain: vk::SwapchainKHR,
    pub loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub config: SwapRingConfig,
    device: Arc<DeviceContext>,
}

impl SwapRing {
    pub fn new(device: Arc<DeviceContext>, surface: &Surface, config: SwapRingConfig) -> Result<Self> {
        log::info!(
            "Creating swap ring: {}x{}, {:?}/{:?}, {:?}, {} images requested",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.image_count
        );

        let loader = khr::Swapchain::new(&device.instance.instance, &device.device);
        let (sharing, family_indices) = sharing_mode(&device.families);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::creation("swapchain"))?;

        // From here on the ring owns the swapchain, so a failure below still
        // releases it through Drop.
        let mut ring = Self {
            swapchain,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            config,
            device,
        };

        ring.images = unsafe { ring.loader.get_swapchain_images(swapchain) }
            .map_err(RendererError::creation("swapchain image list"))?;

        for &image in &ring.images {
            let view = create_image_view(&ring.device.device, image, config.surface_format.format)?;
            ring.image_views.push(view);
        }

        log::info!("Created swap ring with {} images", ring.images.len());
        Ok(ring)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Ask the present engine for the next image. `semaphore` is signalled
    /// once the image is actually usable; the index is in no particular order.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Acquired image {} from a suboptimal swap ring", index);
                }
                Ok(index)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                Err(RendererError::SyncTimeout("swap image acquisition"))
            }
            Err(e) => Err(RendererError::device("acquire next image")(e)),
        }
    }

    /// Hand `image_index` back to the present engine once `wait_semaphores` fire
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::trace!("Presented image {} to a suboptimal swap ring", image_index);
                }
                Ok(())
            }
            Err(e) => Err(RendererError::device("present")(e)),
        }
    }
}

impl Drop for SwapRing {
    fn drop(&mut self) {
        unsafe {
            log::debug!("Destroying {} swap image views", self.image_views.len());
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            log::debug!("Destroying swapchain");
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
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
        });

    unsafe { device.create_image_view(&create_info, None) }
        .map_err(RendererError::creation("swap image view"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 64, height: 48 },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    #[test]
    fn undefined_format_means_unrestricted() {
        let chosen = choose_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )]);
        assert_eq!(chosen, Some(PREFERRED_FORMAT));
        assert_eq!(chosen.unwrap().format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn exact_match_is_preferred() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::R16G16B16A16_SFLOAT,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));

        let reversed = [formats[1], formats[0]];
        assert_eq!(choose_surface_format(&reversed), Some(formats[0]));
    }

    #[test]
    fn falls_back_to_first_reported_format() {
        let only = format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        );
        assert_eq!(choose_surface_format(&[only]), Some(only));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn undefined_among_others_is_not_a_wildcard() {
        let formats = [
            format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&caps, (4000, 10));
        assert_eq!(extent, caps.current_extent);
    }

    #[test]
    fn window_extent_is_clamped_into_bounds() {
        let caps = caps(2, 3);
        for &(w, h) in &[(0, 0), (800, 600), (5000, 5000), (10, 4000), (1920, 1080)] {
            let extent = choose_extent(&caps, (w, h));
            assert!((64..=1920).contains(&extent.width), "{w}x{h} -> {extent:?}");
            assert!((48..=1080).contains(&extent.height), "{w}x{h} -> {extent:?}");
        }
        assert_eq!(
            choose_extent(&caps, (800, 600)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn inverted_extent_bounds_do_not_panic() {
        let mut caps = caps(2, 3);
        caps.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!(
            extent,
            vk::Extent2D {
                width: 0,
                height: 0
            }
        );
    }

    #[test]
    fn image_count_stays_within_surface_bounds() {
        for min in 1..8 {
            for max in std::iter::once(0).chain(min..12) {
                let count = choose_image_count(&caps(min, max));
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
                let expected = if max == 0 { min + 1 } else { (min + 1).min(max) };
                assert_eq!(count, expected);
            }
        }
    }

    #[test]
    fn sharing_follows_queue_families() {
        let shared = QueueFamilies {
            graphics: 0,
            presentation: 0,
        };
        assert_eq!(sharing_mode(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies {
            graphics: 0,
            presentation: 2,
        };
        assert_eq!(sharing_mode(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn negotiate_combines_every_choice() {
        let support = SurfaceSupport {
            capabilities: caps(2, 0),
            formats: vec![format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let config = SwapRingConfig::negotiate(&support, (800, 600)).unwrap();
        assert_eq!(config.surface_format, PREFERRED_FORMAT);
        assert_eq!(config.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.image_count, 3);
        assert_eq!(
            config.extent,
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn negotiate_without_formats_is_unsupported() {
        let support = SurfaceSupport {
            capabilities: caps(2, 3),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(matches!(
            SwapRingConfig::negotiate(&support, (800, 600)),
            Err(RendererError::UnsupportedPlatform(_))
        ));
    }
}
