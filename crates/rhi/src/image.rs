//! Owning GPU images: image, backing memory, and optional view.

use std::sync::Arc;

use ash::vk;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Creation parameters for [`Image`].
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
    pub create_view: bool,
}

/// 2D image with dedicated device memory.
///
/// Move-only RAII: image, memory, and view are destroyed together. The
/// memory type is resolved through the device's memory index lookup.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.handle().create_image(&create_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        let memory_index =
            device.find_memory_index(requirements.memory_type_bits, desc.memory_flags)?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = match unsafe { device.handle().allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(err.into());
            }
        };

        unsafe { device.handle().bind_image_memory(image, memory, 0)? };

        let view = if desc.create_view {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(desc.aspect)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            unsafe { device.handle().create_image_view(&view_info, None)? }
        } else {
            vk::ImageView::null()
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
        })
    }

    /// Device-local depth attachment in the device's detected depth
    /// format.
    pub fn new_depth(device: Arc<Device>, width: u32, height: u32) -> RhiResult<Self> {
        let format = device.depth_format();
        Self::new(
            device,
            &ImageDesc {
                width,
                height,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                aspect: vk::ImageAspectFlags::DEPTH,
                create_view: true,
            },
        )
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Records a layout transition barrier on `cb`.
    ///
    /// Supports the transfer-write and shader-read transitions the
    /// upload path needs.
    pub fn transition_layout(
        &self,
        cb: &CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => {
                return Err(RhiError::ResourceError(format!(
                    "unsupported layout transition {old_layout:?} -> {new_layout:?}"
                )));
            }
        };

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        cb.pipeline_barrier(src_stage, dst_stage, &[barrier]);
        Ok(())
    }

    /// Records a full-extent copy from `buffer` into the image. The
    /// image must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer(&self, cb: &CommandBuffer, buffer: vk::Buffer) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });

        cb.copy_buffer_to_image(
            buffer,
            self.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}
