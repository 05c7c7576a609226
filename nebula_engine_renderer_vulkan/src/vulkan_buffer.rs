/// Buffer resources - Vulkan implementation of the buffer traits
///
/// One shared `Buffer` core handles allocation and uploads; the
/// vertex/index/storage wrappers implement the engine traits on top of it.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use nebula_engine::engine_bail;
use nebula_engine::nebula::render::{
    IndexBuffer as RendererIndexBuffer, StorageBuffer as RendererStorageBuffer,
    VertexBuffer as RendererVertexBuffer,
};
use nebula_engine::nebula::{Error, Result};

use crate::vulkan_context::GpuContext;

/// View trait-object buffers as the Vulkan implementations; the backend
/// only hands out its own types
pub(crate) fn as_vulkan_vertex_buffer(buffer: &Arc<dyn RendererVertexBuffer>) -> &VertexBuffer {
    unsafe { &*(Arc::as_ptr(buffer) as *const VertexBuffer) }
}

pub(crate) fn as_vulkan_index_buffer(buffer: &Arc<dyn RendererIndexBuffer>) -> &IndexBuffer {
    unsafe { &*(Arc::as_ptr(buffer) as *const IndexBuffer) }
}

/// Allocation-backed Vulkan buffer
pub(crate) struct Buffer {
    context: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    size: u64,
    location: MemoryLocation,
}

impl Buffer {
    pub fn new(
        context: Arc<GpuContext>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidResource(
                "Buffer size must be non-zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            context.device.create_buffer(&buffer_info, None).map_err(|e| {
                nebula_engine::engine_err!("nebula::vulkan", "Failed to create buffer: {:?}", e)
            })?
        };

        let requirements = unsafe { context.device.get_buffer_memory_requirements(buffer) };

        let allocation = context
            .allocator
            .lock()
            .map_err(|_| Error::BackendError("Allocator mutex poisoned".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { context.device.destroy_buffer(buffer, None) };
                nebula_engine::engine_error!(
                    "nebula::vulkan",
                    "Buffer allocation of {} bytes failed: {:?}",
                    size,
                    e
                );
                Error::OutOfMemory
            })?;

        unsafe {
            context
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    nebula_engine::engine_err!("nebula::vulkan", "Failed to bind buffer memory: {:?}", e)
                })?;
        }

        Ok(Self {
            context,
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size,
            location,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write `data` at `offset`, through the mapping for host-visible
    /// buffers or through a staging copy for device-local ones
    pub fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            engine_bail!(
                "nebula::vulkan",
                "Buffer update out of range: offset {} + {} bytes exceeds size {}",
                offset,
                data.len(),
                self.size
            );
        }

        if self.location == MemoryLocation::CpuToGpu {
            let mut guard = self
                .allocation
                .lock()
                .map_err(|_| Error::BackendError("Buffer allocation mutex poisoned".to_string()))?;
            let allocation = guard
                .as_mut()
                .ok_or_else(|| Error::InvalidResource("Buffer already destroyed".to_string()))?;
            let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
                Error::BackendError("Host-visible buffer is not mapped".to_string())
            })?;
            let start = offset as usize;
            mapped[start..start + data.len()].copy_from_slice(data);
            Ok(())
        } else {
            self.upload_via_staging(offset, data)
        }
    }

    fn upload_via_staging(&self, offset: u64, data: &[u8]) -> Result<()> {
        let staging = Buffer::new(
            self.context.clone(),
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        staging.update(0, data)?;

        let family = self.context.queues.graphics_family;
        let cb = self.context.begin_single_time_commands(family)?;
        unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as u64,
            };
            self.context
                .device
                .cmd_copy_buffer(cb, staging.buffer, self.buffer, &[region]);
        }
        self.context.end_single_time_commands(cb, family)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_buffer(self.buffer, None);
        }
        if let (Ok(mut guard), Ok(mut allocator)) =
            (self.allocation.lock(), self.context.allocator.lock())
        {
            if let Some(allocation) = guard.take() {
                let _ = allocator.free(allocation);
            }
        }
    }
}

/// Vulkan vertex buffer
pub struct VertexBuffer {
    pub(crate) inner: Buffer,
    vertex_count: u32,
}

impl VertexBuffer {
    pub(crate) fn new(context: Arc<GpuContext>, size: u64, vertex_count: u32) -> Result<Self> {
        let inner = Buffer::new(
            context,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::CpuToGpu,
            "vertex buffer",
        )?;
        Ok(Self {
            inner,
            vertex_count,
        })
    }
}

impl RendererVertexBuffer for VertexBuffer {
    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.update(offset, data)
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Vulkan index buffer
pub struct IndexBuffer {
    pub(crate) inner: Buffer,
    index_count: u32,
}

impl IndexBuffer {
    pub(crate) fn new(context: Arc<GpuContext>, size: u64, index_count: u32) -> Result<Self> {
        let inner = Buffer::new(
            context,
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::CpuToGpu,
            "index buffer",
        )?;
        Ok(Self { inner, index_count })
    }
}

impl RendererIndexBuffer for IndexBuffer {
    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.update(offset, data)
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Vulkan storage buffer
///
/// Device-local; doubles as a vertex source so compute output can feed the
/// vertex stage directly. These buffers are what queue ownership transfers
/// move between families.
pub struct StorageBuffer {
    pub(crate) inner: Buffer,
}

impl StorageBuffer {
    pub(crate) fn new(context: Arc<GpuContext>, size: u64) -> Result<Self> {
        let inner = Buffer::new(
            context,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "storage buffer",
        )?;
        Ok(Self { inner })
    }

    pub(crate) fn vk_buffer(&self) -> vk::Buffer {
        self.inner.buffer
    }
}

impl RendererStorageBuffer for StorageBuffer {
    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.update(offset, data)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}
