//! Vulkan logical device, queues, and device memory queries.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Depth formats probed in preference order at device creation.
const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Logical device wrapper shared across the renderer via `Arc`.
///
/// Caches the physical device's memory properties and the detected depth
/// format so per-allocation lookups never touch the instance again.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    depth_format: vk::Format,
}

impl Device {
    /// Creates the logical device with one queue per unique family and
    /// probes the depth format.
    ///
    /// # Errors
    ///
    /// Fails when device creation fails, when a required queue family is
    /// missing from `physical_device_info`, or when none of the candidate
    /// depth formats supports optimal-tiling depth attachments.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family), Some(transfer_family)) = (
            queue_families.graphics_family,
            queue_families.present_family,
            queue_families.transfer_family,
        ) else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "creating {} queue(s) for families {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let transfer_queue = unsafe { device.get_device_queue(transfer_family, 0) };
        debug!(
            "queues: graphics={graphics_family} present={present_family} transfer={transfer_family}"
        );

        let depth_format = detect_depth_format(instance.handle(), physical_device_info.device)?;
        info!(
            "logical device created, depth format {:?}",
            depth_format
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            graphics_queue,
            present_queue,
            transfer_queue,
            queue_families,
            memory_properties: physical_device_info.memory_properties,
            depth_format,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Depth format detected at device creation.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Resolves a memory type index for an allocation.
    ///
    /// `type_filter` comes from `vk::MemoryRequirements::memory_type_bits`.
    ///
    /// # Errors
    ///
    /// [`RhiError::NoSuitableMemoryType`] when no memory type matches.
    pub fn find_memory_index(
        &self,
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, RhiError> {
        find_memory_index(&self.memory_properties, type_filter, flags).ok_or(
            RhiError::NoSuitableMemoryType { type_filter, flags },
        )
    }

    /// Blocks until all queues drain. Used before any teardown or
    /// swapchain recreation.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                tracing::error!("device_wait_idle failed during drop: {err:?}");
            }
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}

/// Scans memory types for one that is in `type_filter` and carries all
/// requested property flags.
pub fn find_memory_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            (type_filter & (1 << index)) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
}

/// Probes the candidate depth formats for optimal-tiling depth-stencil
/// attachment support.
fn detect_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format, RhiError> {
    for &format in DEPTH_FORMAT_CANDIDATES {
        let props =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }
    Err(RhiError::ResourceError(
        "no supported depth format".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(
        types: &[(vk::MemoryPropertyFlags, u32)],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (i, (flags, heap)) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: *heap,
            };
        }
        props
    }

    #[test]
    fn finds_first_matching_type() {
        let props = memory_properties(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
        ]);

        let index = find_memory_index(
            &props,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn respects_type_filter() {
        let props = memory_properties(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
        ]);

        // Only type 1 allowed by the filter.
        let index = find_memory_index(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn missing_flags_yield_none() {
        let props = memory_properties(&[(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0)]);
        let index = find_memory_index(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, None);
    }

    #[test]
    fn ignores_types_beyond_count() {
        let mut props = memory_properties(&[(vk::MemoryPropertyFlags::DEVICE_LOCAL, 0)]);
        // A stale entry past memory_type_count must not be considered.
        props.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
            heap_index: 0,
        };
        let index = find_memory_index(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, None);
    }

    #[test]
    fn required_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }
}
