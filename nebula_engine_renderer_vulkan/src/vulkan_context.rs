/// GpuContext - Shared Vulkan device state
///
/// Owns the instance, logical device, allocator, queue registry and the
/// per-family upload command pools. Every backend object holds an
/// `Arc<GpuContext>`; the context tears the device down once the last
/// holder is gone.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use nebula_engine::engine_bail;
use nebula_engine::nebula::{Error, Result};
use rustc_hash::FxHashMap;

/// Queues and family indices resolved at device creation
///
/// Compute and transfer fall back to the graphics family when the hardware
/// has no dedicated family for them; the `has_dedicated_*` predicates tell
/// the sync engine whether queue ownership transfers are required.
#[derive(Clone, Copy)]
pub struct QueueRegistry {
    pub graphics_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
}

impl QueueRegistry {
    pub fn has_dedicated_compute_queue(&self) -> bool {
        self.compute_family != self.graphics_family
    }

    pub fn has_dedicated_transfer_queue(&self) -> bool {
        self.transfer_family != self.graphics_family
            && self.transfer_family != self.compute_family
    }
}

/// Queue family indices picked from the physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueFamilySelection {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilySelection {
    /// Families that need their own `VkDeviceQueueCreateInfo`
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        if !families.contains(&self.compute) {
            families.push(self.compute);
        }
        if !families.contains(&self.transfer) {
            families.push(self.transfer);
        }
        families
    }
}

/// Pick graphics, compute and transfer families from the device's queue
/// family properties
///
/// Graphics is the first family with GRAPHICS. Compute prefers a family
/// with COMPUTE but without GRAPHICS; transfer prefers TRANSFER without
/// GRAPHICS or COMPUTE. Both fall back to the graphics family.
pub(crate) fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
) -> Result<QueueFamilySelection> {
    let graphics = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or_else(|| {
            Error::InitializationFailed("No graphics queue family available".to_string())
        })? as u32;

    let compute = families
        .iter()
        .position(|f| {
            f.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|i| i as u32)
        .unwrap_or(graphics);

    let transfer = families
        .iter()
        .position(|f| {
            f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && !f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|i| i as u32)
        .unwrap_or(graphics);

    Ok(QueueFamilySelection {
        graphics,
        compute,
        transfer,
    })
}

/// Depth format probe order: the requested format first, then the fallbacks
/// from widest to narrowest precision
pub(crate) fn depth_format_candidates(requested: vk::Format) -> [vk::Format; 4] {
    [
        requested,
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ]
}

/// Shared Vulkan context
///
/// Field order matters for Drop: the allocator must be released before the
/// device, and the device before the instance. Destruction is explicit in
/// the Drop impl below.
pub struct GpuContext {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,

    /// GPU memory allocator, shared with buffers and textures
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    pub queues: QueueRegistry,

    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,

    /// Transient command pools for single-time submissions, one per
    /// distinct queue family
    pub(crate) upload_pools: Mutex<FxHashMap<u32, vk::CommandPool>>,

    pub properties: vk::PhysicalDeviceProperties,

    #[cfg(feature = "vulkan-validation")]
    pub(crate) debug_messenger: Option<(
        ash::ext::debug_utils::Instance,
        vk::DebugUtilsMessengerEXT,
    )>,
}

impl GpuContext {
    /// Queue handle for a resolved family index
    pub fn queue_for_family(&self, family: u32) -> vk::Queue {
        if family == self.queues.compute_family && self.queues.has_dedicated_compute_queue() {
            self.queues.compute_queue
        } else if family == self.queues.transfer_family
            && self.queues.has_dedicated_transfer_queue()
        {
            self.queues.transfer_queue
        } else {
            self.queues.graphics_queue
        }
    }

    /// First format in `candidates` supported with the requested tiling
    /// features
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        for &format in candidates {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            let supported = match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            };
            if supported {
                return Ok(format);
            }
        }
        engine_bail!(
            "nebula::vulkan",
            "No supported format among {:?} for features {:?}",
            candidates,
            features
        );
    }

    /// Resolve a depth format, falling back through D32 → D32_S8 → D24_S8
    /// when the requested one lacks depth-attachment support
    pub fn find_depth_format(&self, requested: vk::Format) -> Result<vk::Format> {
        self.find_supported_format(
            &depth_format_candidates(requested),
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Begin a one-shot command buffer on the given queue family
    pub fn begin_single_time_commands(&self, queue_family: u32) -> Result<vk::CommandBuffer> {
        let pool = self.upload_pool(queue_family)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let cb = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| {
                    nebula_engine::engine_err!(
                        "nebula::vulkan",
                        "Failed to allocate single-time command buffer: {:?}",
                        e
                    )
                })?[0];

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cb, &begin_info).map_err(|e| {
                nebula_engine::engine_err!(
                    "nebula::vulkan",
                    "Failed to begin single-time command buffer: {:?}",
                    e
                )
            })?;

            Ok(cb)
        }
    }

    /// End, submit and free a one-shot command buffer, waiting for the queue
    /// to drain before returning
    pub fn end_single_time_commands(
        &self,
        cb: vk::CommandBuffer,
        queue_family: u32,
    ) -> Result<()> {
        let pool = self.upload_pool(queue_family)?;
        let queue = self.queue_for_family(queue_family);

        unsafe {
            self.device.end_command_buffer(cb).map_err(|e| {
                nebula_engine::engine_err!(
                    "nebula::vulkan",
                    "Failed to end single-time command buffer: {:?}",
                    e
                )
            })?;

            let command_buffers = [cb];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(|e| {
                    nebula_engine::engine_err!(
                        "nebula::vulkan",
                        "Failed to submit single-time command buffer: {:?}",
                        e
                    )
                })?;
            self.device.queue_wait_idle(queue).map_err(|e| {
                nebula_engine::engine_err!(
                    "nebula::vulkan",
                    "Failed to wait for single-time submission: {:?}",
                    e
                )
            })?;

            self.device.free_command_buffers(pool, &command_buffers);
        }

        Ok(())
    }

    fn upload_pool(&self, queue_family: u32) -> Result<vk::CommandPool> {
        let mut pools = self
            .upload_pools
            .lock()
            .map_err(|_| Error::BackendError("Upload pool mutex poisoned".to_string()))?;

        if let Some(&pool) = pools.get(&queue_family) {
            return Ok(pool);
        }

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family);
        let pool = unsafe {
            self.device.create_command_pool(&pool_info, None).map_err(|e| {
                nebula_engine::engine_err!(
                    "nebula::vulkan",
                    "Failed to create upload command pool for family {}: {:?}",
                    queue_family,
                    e
                )
            })?
        };
        pools.insert(queue_family, pool);
        Ok(pool)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            if let Ok(pools) = self.upload_pools.lock() {
                for &pool in pools.values() {
                    self.device.destroy_command_pool(pool, None);
                }
            }

            // Allocator frees its memory against the device, so it goes first
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            #[cfg(feature = "vulkan-validation")]
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_context_tests.rs"]
mod tests;
