//! Physical device (GPU) enumeration and selection.
//!
//! Selection is a filter-then-score pass: every GPU missing a hard
//! requirement (queue families, the swapchain extension, sampler
//! anisotropy, an adequate surface) is discarded, then the survivors are
//! ranked and the best one wins. No fallback exists; an empty survivor
//! set is a hard failure.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;
use crate::swapchain::SwapchainSupportDetails;

/// Queue family assignments resolved during device selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics submission.
    pub graphics_family: Option<u32>,
    /// Family used for presentation to the surface.
    pub present_family: Option<u32>,
    /// Family with compute capability, when the device has one.
    pub compute_family: Option<u32>,
    /// Family used for staging transfers.
    pub transfer_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// True when every required role has a family.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
            && self.present_family.is_some()
            && self.transfer_family.is_some()
    }

    /// Distinct family indices, for logical device queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        if let Some(transfer) = self.transfer_family
            && !families.contains(&transfer)
        {
            families.push(transfer);
        }

        families
    }
}

/// Everything the logical device layer needs to know about the chosen GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "other",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{major}.{minor}.{patch}"))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest-scoring GPU that meets every requirement.
///
/// # Errors
///
/// [`RhiError::NoSuitableGpu`] when no device passes the requirement
/// filter or the best candidate scores zero.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("no Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    debug!("found {} GPU(s)", devices.len());

    let mut candidates: Vec<(PhysicalDeviceInfo, u32)> = Vec::new();
    for device in devices {
        if let Some(info) = check_device_suitability(instance, device, surface, surface_loader) {
            let score = rate_device(&info.properties);
            debug!(
                "GPU '{}' ({}) scored {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            candidates.push((info, score));
        }
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    let Some((selected, score)) = candidates.into_iter().next() else {
        warn!("no GPU meets the renderer's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    if score == 0 {
        warn!("best candidate '{}' scored zero", selected.device_name());
        return Err(RhiError::NoSuitableGpu);
    }

    let (major, minor, patch) = selected.api_version();
    info!(
        "selected GPU '{}' ({}), Vulkan {}.{}.{}, score {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

/// Applies the hard requirements; `None` means the GPU is rejected.
fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let family_props = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let present_support: Vec<bool> = (0..family_props.len() as u32)
        .map(|i| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        })
        .collect();

    let queue_families = assign_queue_roles(&family_props, &present_support);
    if !queue_families.is_complete() {
        debug!("GPU '{device_name}' rejected: missing required queue families");
        return None;
    }

    if !supports_swapchain_extension(instance, device) {
        debug!("GPU '{device_name}' rejected: no swapchain extension");
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{device_name}' rejected: sampler anisotropy unsupported");
        return None;
    }

    match SwapchainSupportDetails::query(device, surface, surface_loader) {
        Ok(support) if support.is_adequate() => {}
        Ok(_) => {
            debug!("GPU '{device_name}' rejected: surface has no formats or present modes");
            return None;
        }
        Err(err) => {
            debug!("GPU '{device_name}' rejected: surface query failed: {err}");
            return None;
        }
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

fn supports_swapchain_extension(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    let wanted = ash::khr::swapchain::NAME.to_bytes_with_nul();
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name.to_bytes_with_nul() == wanted
    })
}

/// Maps queue families onto the graphics, present, and transfer roles.
///
/// Graphics takes the first graphics-capable family and present the
/// first family the surface accepts. Transfer goes to the
/// transfer-capable family wearing the fewest hats, so a dedicated DMA
/// queue wins over the graphics family when the hardware has one.
fn assign_queue_roles(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_roles = u32::MAX;

    for (i, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = i as u32;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && indices.graphics_family.is_none()
        {
            indices.graphics_family = Some(index);
        }

        if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && indices.compute_family.is_none()
        {
            indices.compute_family = Some(index);
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            let roles = [
                vk::QueueFlags::GRAPHICS,
                vk::QueueFlags::COMPUTE,
                vk::QueueFlags::TRANSFER,
            ]
            .iter()
            .filter(|flag| family.queue_flags.contains(**flag))
            .count() as u32;

            if roles < min_transfer_roles {
                min_transfer_roles = roles;
                indices.transfer_family = Some(index);
            }
        }

        if indices.present_family.is_none() && present_support.get(i).copied().unwrap_or(false) {
            indices.present_family = Some(index);
        }
    }

    indices
}

/// Ranks a GPU: discrete hardware gets a flat bonus, then the maximum
/// 2D image dimension separates devices of the same class.
fn rate_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let mut score = 0u32;

    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }

    score += properties.limits.max_image_dimension2_d;

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn incomplete_without_transfer() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: None,
            transfer_family: None,
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn unique_families_deduplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: None,
            transfer_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn unique_families_all_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: None,
            transfer_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn dedicated_transfer_family_preferred() {
        let families = [
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            ),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = assign_queue_roles(&families, &[true, false]);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
        assert_eq!(indices.transfer_family, Some(1));
    }

    #[test]
    fn transfer_falls_back_to_graphics_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            2,
        )];
        let indices = assign_queue_roles(&families, &[true]);
        assert_eq!(indices.transfer_family, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn fewest_roles_wins_among_transfer_families() {
        let families = [
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            ),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = assign_queue_roles(&families, &[true, false, false]);
        assert_eq!(indices.transfer_family, Some(2));
    }

    #[test]
    fn empty_family_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = assign_queue_roles(&families, &[false, true]);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn discrete_gpu_outscores_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties::default();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        discrete.limits.max_image_dimension2_d = 4096;

        let mut integrated = vk::PhysicalDeviceProperties::default();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.limits.max_image_dimension2_d = 4096;

        assert!(rate_device(&discrete) > rate_device(&integrated));
        assert_eq!(rate_device(&discrete) - rate_device(&integrated), 1000);
    }

    #[test]
    fn larger_image_limit_breaks_ties() {
        let mut a = vk::PhysicalDeviceProperties::default();
        a.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        a.limits.max_image_dimension2_d = 16384;

        let mut b = vk::PhysicalDeviceProperties::default();
        b.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        b.limits.max_image_dimension2_d = 8192;

        assert!(rate_device(&a) > rate_device(&b));
    }
}
