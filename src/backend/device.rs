// Vulkan Device - adapter selection and logical device
//
// Responsibilities:
// - Probe every adapter for queue families, extensions, and surface support
// - Pick the first suitable adapter in enumeration order (no ranking)
// - Create one queue per distinct family and hand out graphics/present queues

use super::error::{RendererError, Result};
use super::instance::{missing_names, vk_name, InstanceContext};
use super::surface::Surface;
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

/// Device extensions every adapter must support
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// What one queue family offers
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyReport {
    pub queue_count: u32,
    pub graphics: bool,
    /// Reported by the platform for the target surface
    pub presentation: bool,
}

/// Family index per queue role, while the scan is still looking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, taking the first match for each role.
    /// Stops as soon as both roles are resolved.
    pub fn find(families: &[QueueFamilyReport]) -> Self {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = index as u32;
            if family.graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if family.presentation && indices.presentation.is_none() {
                indices.presentation = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    pub fn complete(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            presentation: self.presentation?,
        })
    }
}

/// Fully resolved queue families. Both roles may name the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub presentation: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.presentation
    }

    /// One entry per distinct family, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.presentation]
        }
    }
}

/// Snapshot of one adapter, gathered before any selection happens
#[derive(Debug, Clone, Default)]
pub struct AdapterReport {
    pub name: String,
    pub queue_families: Vec<QueueFamilyReport>,
    pub extensions: Vec<String>,
    pub surface_formats: usize,
    pub present_modes: usize,
    /// Set when querying the adapter itself failed
    pub probe_error: Option<String>,
}

/// Why an adapter was passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsuitable {
    ProbeFailed(String),
    MissingQueues(QueueFamilyIndices),
    MissingExtensions(Vec<String>),
    NoSurfaceFormats,
    NoPresentModes,
}

impl AdapterReport {
    pub fn check(&self) -> std::result::Result<QueueFamilies, Unsuitable> {
        if let Some(error) = &self.probe_error {
            return Err(Unsuitable::ProbeFailed(error.clone()));
        }

        let indices = QueueFamilyIndices::find(&self.queue_families);
        let families = indices
            .complete()
            .ok_or(Unsuitable::MissingQueues(indices))?;

        let missing = missing_names(&required_device_extensions(), &self.extensions);
        if !missing.is_empty() {
            return Err(Unsuitable::MissingExtensions(missing));
        }
        if self.surface_formats == 0 {
            return Err(Unsuitable::NoSurfaceFormats);
        }
        if self.present_modes == 0 {
            return Err(Unsuitable::NoPresentModes);
        }
        Ok(families)
    }
}

/// First suitable adapter in enumeration order, with its queue families
pub fn select_adapter(reports: &[AdapterReport]) -> Option<(usize, QueueFamilies)> {
    reports.iter().enumerate().find_map(|(index, report)| match report.check() {
        Ok(families) => Some((index, families)),
        Err(reason) => {
            log::debug!("Skipping adapter {:?}: {:?}", report.name, reason);
            None
        }
    })
}

/// Selected adapter, logical device, and its queues
pub struct DeviceContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    /// May be the same queue as `graphics_queue`
    pub presentation_queue: vk::Queue,
    pub instance: Arc<InstanceContext>,
}

impl DeviceContext {
    /// Pick an adapter able to render and present to `surface`, then open it
    pub fn resolve(instance: Arc<InstanceContext>, surface: &Surface) -> Result<Arc<Self>> {
        let adapters = unsafe { instance.instance.enumerate_physical_devices() }.map_err(|e| {
            RendererError::UnsupportedPlatform(format!("cannot enumerate adapters: {e}"))
        })?;

        if adapters.is_empty() {
            return Err(RendererError::NoCapableDevice(0));
        }

        let reports: Vec<AdapterReport> = adapters
            .iter()
            .map(|&adapter| probe_adapter(&instance.instance, surface, adapter))
            .collect();

        let (chosen, families) =
            select_adapter(&reports).ok_or(RendererError::NoCapableDevice(adapters.len()))?;
        let physical_device = adapters[chosen];

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        log::info!("Selected GPU: {}", reports[chosen].name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} presentation={}{}",
            families.graphics,
            families.presentation,
            if families.is_shared() { " (shared)" } else { "" }
        );

        let device = create_logical_device(&instance.instance, physical_device, &families)?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let presentation_queue = unsafe { device.get_device_queue(families.presentation, 0) };

        Ok(Arc::new(Self {
            device,
            physical_device,
            families,
            graphics_queue,
            presentation_queue,
            instance,
        }))
    }

    /// Block until the device has no work of any kind in flight
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RendererError::device("device wait idle"))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::debug!("Destroying logical device");
        unsafe { self.device.destroy_device(None) };
    }
}

/// A failed query only disqualifies this adapter, never the whole scan
fn probe_adapter(
    instance: &ash::Instance,
    surface: &Surface,
    adapter: vk::PhysicalDevice,
) -> AdapterReport {
    let properties = unsafe { instance.get_physical_device_properties(adapter) };
    let name = vk_name(&properties.device_name);

    match query_adapter(instance, surface, adapter) {
        Ok(report) => AdapterReport { name, ..report },
        Err(e) => AdapterReport {
            name,
            probe_error: Some(e.to_string()),
            ..Default::default()
        },
    }
}

fn query_adapter(
    instance: &ash::Instance,
    surface: &Surface,
    adapter: vk::PhysicalDevice,
) -> Result<AdapterReport> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(adapter) };

    let queue_families = families
        .iter()
        .enumerate()
        .map(|(index, family)| {
            Ok(QueueFamilyReport {
                queue_count: family.queue_count,
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                presentation: surface.supports_presentation(adapter, index as u32)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(adapter) }
        .map_err(RendererError::creation("device extension list"))?
        .iter()
        .map(|props| vk_name(&props.extension_name))
        .collect();

    let support = surface.support(adapter)?;

    Ok(AdapterReport {
        queue_families,
        extensions,
        surface_formats: support.formats.len(),
        present_modes: support.present_modes.len(),
        ..Default::default()
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<_> = required_device_extensions()
        .iter()
        .map(|name| name.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(RendererError::creation("logical device"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(graphics: bool, presentation: bool) -> QueueFamilyReport {
        QueueFamilyReport {
            queue_count: 1,
            graphics,
            presentation,
        }
    }

    fn adapter(name: &str, families: Vec<QueueFamilyReport>) -> AdapterReport {
        AdapterReport {
            name: name.to_string(),
            queue_families: families,
            extensions: vec!["VK_KHR_swapchain".to_string()],
            surface_formats: 1,
            present_modes: 1,
            probe_error: None,
        }
    }

    #[test]
    fn one_family_can_serve_both_roles() {
        let indices = QueueFamilyIndices::find(&[family(false, false), family(true, true)]);
        let families = indices.complete().unwrap();
        assert_eq!(families, QueueFamilies { graphics: 1, presentation: 1 });
        assert!(families.is_shared());
        assert_eq!(families.unique(), vec![1]);
    }

    #[test]
    fn split_families_create_two_queues() {
        let indices = QueueFamilyIndices::find(&[family(true, false), family(false, true)]);
        let families = indices.complete().unwrap();
        assert_eq!(families, QueueFamilies { graphics: 0, presentation: 1 });
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn graphics_does_not_imply_presentation() {
        let indices = QueueFamilyIndices::find(&[family(true, false)]);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.presentation, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn empty_families_are_ignored() {
        let empty = QueueFamilyReport {
            queue_count: 0,
            graphics: true,
            presentation: true,
        };
        let indices = QueueFamilyIndices::find(&[empty, family(true, true)]);
        assert_eq!(indices.complete().unwrap().graphics, 1);
    }

    #[test]
    fn first_suitable_adapter_wins() {
        let reports = vec![
            adapter("no present", vec![family(true, false)]),
            adapter("split", vec![family(true, false), family(false, true)]),
            adapter("shared", vec![family(true, true)]),
        ];
        let (index, families) = select_adapter(&reports).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families, QueueFamilies { graphics: 0, presentation: 1 });
    }

    #[test]
    fn first_suitable_adapter_wins_for_any_prefix_of_rejects() {
        for rejects in 0..6 {
            let mut reports: Vec<AdapterReport> = (0..rejects)
                .map(|i| {
                    let mut report = adapter(&format!("reject {i}"), vec![family(true, true)]);
                    report.present_modes = 0;
                    report
                })
                .collect();
            reports.push(adapter("good", vec![family(true, true)]));
            reports.push(adapter("also good", vec![family(true, false), family(false, true)]));

            let (index, _) = select_adapter(&reports).unwrap();
            assert_eq!(index, rejects);
        }
    }

    #[test]
    fn missing_swapchain_extension_is_unsuitable() {
        let mut report = adapter("headless", vec![family(true, true)]);
        report.extensions = vec!["VK_KHR_maintenance1".to_string()];
        assert_eq!(
            report.check(),
            Err(Unsuitable::MissingExtensions(vec!["VK_KHR_swapchain".to_string()]))
        );
    }

    #[test]
    fn surface_without_formats_or_modes_is_unsuitable() {
        let mut report = adapter("gpu", vec![family(true, true)]);
        report.surface_formats = 0;
        assert_eq!(report.check(), Err(Unsuitable::NoSurfaceFormats));

        let mut report = adapter("gpu", vec![family(true, true)]);
        report.present_modes = 0;
        assert_eq!(report.check(), Err(Unsuitable::NoPresentModes));
    }

    #[test]
    fn failed_probe_does_not_hide_later_adapters() {
        let broken = AdapterReport {
            name: "no display".to_string(),
            probe_error: Some("failed to create surface capabilities query".to_string()),
            ..Default::default()
        };
        assert!(matches!(broken.check(), Err(Unsuitable::ProbeFailed(_))));

        let reports = vec![broken, adapter("good", vec![family(true, true)])];
        let (index, families) = select_adapter(&reports).unwrap();
        assert_eq!(index, 1);
        assert!(families.is_shared());

        assert!(select_adapter(&reports[..1]).is_none());
    }

    #[test]
    fn no_adapters_selects_nothing() {
        assert!(select_adapter(&[]).is_none());
        assert!(select_adapter(&[adapter("compute only", vec![family(false, false)])]).is_none());
    }
}
