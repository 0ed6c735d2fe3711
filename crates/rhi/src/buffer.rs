//! GPU buffers with manually allocated device memory.
//!
//! Memory types are resolved through the device's memory index lookup.
//! Host-visible buffers stay persistently mapped; device-local buffers
//! are filled through a staging buffer and a single-use transfer.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Intended use of a buffer, deciding usage flags and memory placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled via staging upload.
    Vertex,
    /// Device-local index data, filled via staging upload.
    Index,
    /// Host-visible uniform data, written every frame.
    Uniform,
    /// Host-visible transfer source.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    pub fn is_host_visible(self) -> bool {
        self.memory_flags()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Buffer plus its dedicated memory allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: Option<*mut u8>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

// The mapped pointer is exclusively owned by the buffer.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Creates the buffer and its backing memory. Host-visible buffers
    /// are mapped for their whole lifetime.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::ResourceError(
                "buffer size must be non-zero".into(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };
        let memory_index =
            device.find_memory_index(requirements.memory_type_bits, usage.memory_flags())?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = match unsafe { device.handle().allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        unsafe { device.handle().bind_buffer_memory(buffer, memory, 0)? };

        let mapped = if usage.is_host_visible() {
            let ptr = unsafe {
                device
                    .handle()
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
            };
            Some(ptr as *mut u8)
        } else {
            None
        };

        debug!("created {} buffer of {size} bytes", usage.name());

        Ok(Self {
            device,
            buffer,
            memory,
            mapped,
            size,
            usage,
        })
    }

    /// Writes `data` at `offset` through the persistent mapping.
    ///
    /// # Errors
    ///
    /// Fails for device-local buffers and out-of-range writes.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::ResourceError(format!(
                "write of {} bytes at offset {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        let Some(mapped) = self.mapped else {
            return Err(RhiError::ResourceError(
                "buffer memory is not host visible".into(),
            ));
        };

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Uploads `data` into a device-local buffer through a staging
    /// buffer and a blocking single-use transfer on `queue`.
    pub fn upload(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[u8],
    ) -> RhiResult<()> {
        let staging = Buffer::new(
            self.device.clone(),
            BufferUsage::Staging,
            data.len() as vk::DeviceSize,
        )?;
        staging.write(0, data)?;

        let cb = CommandBuffer::begin_single_use(pool)?;
        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);
        cb.copy_buffer(staging.handle(), self.buffer, &[region]);
        cb.end_single_use(pool, queue)?;

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.device.handle().unmap_memory(self.memory);
            }
            self.device.handle().destroy_buffer(self.buffer, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_match_role() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn host_visibility_follows_usage() {
        assert!(!BufferUsage::Vertex.is_host_visible());
        assert!(!BufferUsage::Index.is_host_visible());
        assert!(BufferUsage::Uniform.is_host_visible());
        assert!(BufferUsage::Staging.is_host_visible());
    }

    #[test]
    fn device_local_buffers_require_device_memory() {
        assert!(
            BufferUsage::Vertex
                .memory_flags()
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        );
        assert!(
            BufferUsage::Uniform
                .memory_flags()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        );
    }
}
