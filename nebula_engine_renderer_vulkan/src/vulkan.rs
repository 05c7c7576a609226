/// VulkanRenderer - Vulkan implementation of the Renderer trait
///
/// Owns instance/device setup, physical device selection, the shared
/// descriptor pool and the swapchain. All resource creation delegates to the
/// concrete types in the sibling modules.

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use nebula_engine::nebula::render::{
    BufferDesc, BufferUsage, CmdBuffer as RendererCmdBuffer,
    ComputePipeline as RendererComputePipeline, GraphicsPipeline as RendererGraphicsPipeline,
    GraphicsPipelineConfig, ImageFormat, IndexBuffer as RendererIndexBuffer, Renderer,
    RendererConfig, Renderpass as RendererRenderpass, RenderpassConfig, Shader as RendererShader,
    ShaderDesc, StorageBuffer as RendererStorageBuffer, Texture2D as RendererTexture2D,
    TextureDesc, VertexBuffer as RendererVertexBuffer,
};
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_bail, engine_err, engine_error, engine_info};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;

use crate::vulkan_buffer::{IndexBuffer, StorageBuffer, VertexBuffer};
use crate::vulkan_cmd_buffer::CmdBuffer;
use crate::vulkan_context::{select_queue_families, GpuContext, QueueRegistry};
use crate::vulkan_pipeline::{ComputePipeline, GraphicsPipeline};
use crate::vulkan_render_pass::Renderpass;
use crate::vulkan_shader::Shader;
use crate::vulkan_swapchain::Swapchain;
use crate::vulkan_texture::Texture;

/// Map an engine image format to the Vulkan format
///
/// `ImageFormat::None` resolves to `none_fallback`, which is the swapchain
/// format for injected targets and a default depth format for depth slots.
pub(crate) fn image_format_to_vk(format: ImageFormat, none_fallback: vk::Format) -> vk::Format {
    match format {
        ImageFormat::None => none_fallback,
        ImageFormat::R8Uint => vk::Format::R8_UINT,
        ImageFormat::Rgb8 => vk::Format::R8G8B8_UNORM,
        ImageFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        ImageFormat::Depth32Float => vk::Format::D32_SFLOAT,
        ImageFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
        ImageFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Rank a physical device; `None` disqualifies it
///
/// Devices without a graphics queue family or the swapchain extension are
/// unusable. Among the rest, discrete GPUs and richer queue topologies win.
pub(crate) fn score_physical_device(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    has_swapchain_ext: bool,
    families: &[vk::QueueFamilyProperties],
) -> Option<u32> {
    if !has_swapchain_ext {
        return None;
    }
    let selection = select_queue_families(families).ok()?;

    let mut score = 0u32;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 400;
    }
    if features.sampler_anisotropy == vk::TRUE {
        score += 200;
    }
    if selection.compute != selection.graphics {
        score += 100;
    }
    if selection.transfer != selection.graphics && selection.transfer != selection.compute {
        score += 50;
    }
    Some(score)
}

fn descriptor_pool_sizes() -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 256,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 256,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 256,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: 256,
        },
    ]
}

/// Vulkan renderer
///
/// Central factory object. Resources hold an `Arc<GpuContext>`, so device
/// teardown happens after the last resource is dropped.
pub struct VulkanRenderer {
    _entry: ash::Entry,
    context: Arc<GpuContext>,
    swapchain: Arc<Mutex<Swapchain>>,
    descriptor_pool: vk::DescriptorPool,
}

impl VulkanRenderer {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        width: u32,
        height: u32,
        config: &RendererConfig,
    ) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let app_name = CString::new(config.app_name.clone()).map_err(|_| {
                Error::InitializationFailed("Application name contains a NUL byte".to_string())
            })?;
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Nebula")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window.display_handle().map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to get display handle: {}", e);
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?;
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| {
                        engine_error!(
                            "nebula::vulkan",
                            "Failed to get required extensions: {}",
                            e
                        );
                        Error::InitializationFailed(format!(
                            "Failed to get required extensions: {}",
                            e
                        ))
                    })?
                    .to_vec();

            #[cfg(feature = "vulkan-validation")]
            let validation = config.enable_validation;
            #[cfg(not(feature = "vulkan-validation"))]
            let validation = {
                if config.enable_validation {
                    nebula_engine::engine_warn!(
                        "nebula::vulkan",
                        "Validation requested but the vulkan-validation feature is disabled"
                    );
                }
                false
            };

            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            #[cfg(feature = "vulkan-validation")]
            let debug_messenger = if validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));
                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        engine_error!(
                            "nebula::vulkan",
                            "Failed to create debug messenger: {:?}",
                            e
                        );
                        Error::InitializationFailed(format!(
                            "Failed to create debug messenger: {:?}",
                            e
                        ))
                    })?;
                Some((debug_utils, messenger))
            } else {
                None
            };

            let window_handle = window.window_handle().map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to get window handle: {}", e);
                Error::InitializationFailed(format!("Failed to get window handle: {}", e))
            })?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                engine_error!(
                    "nebula::vulkan",
                    "Failed to enumerate physical devices: {:?}",
                    e
                );
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;

            let mut best: Option<(vk::PhysicalDevice, u32)> = None;
            for candidate in physical_devices {
                let properties = instance.get_physical_device_properties(candidate);
                let features = instance.get_physical_device_features(candidate);
                let families =
                    instance.get_physical_device_queue_family_properties(candidate);

                let has_swapchain_ext = instance
                    .enumerate_device_extension_properties(candidate)
                    .map(|exts| {
                        exts.iter().any(|ext| {
                            ext.extension_name_as_c_str()
                                .map(|name| name == ash::khr::swapchain::NAME)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);

                let Some(score) =
                    score_physical_device(&properties, &features, has_swapchain_ext, &families)
                else {
                    continue;
                };

                // Presentation runs on the graphics queue, so its family
                // must support the surface
                let selection = select_queue_families(&families)?;
                let present_ok = surface_loader
                    .get_physical_device_surface_support(candidate, selection.graphics, surface)
                    .unwrap_or(false);
                if !present_ok {
                    continue;
                }

                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((candidate, score));
                }
            }

            let Some((physical_device, _)) = best else {
                surface_loader.destroy_surface(surface, None);
                instance.destroy_instance(None);
                engine_error!("nebula::vulkan", "No suitable Vulkan GPU found");
                return Err(Error::InitializationFailed(
                    "No suitable Vulkan GPU found".to_string(),
                ));
            };

            let properties = instance.get_physical_device_properties(physical_device);
            let families =
                instance.get_physical_device_queue_family_properties(physical_device);
            let selection = select_queue_families(&families)?;

            let queue_priorities = [1.0];
            let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selection
                .unique_families()
                .into_iter()
                .map(|family| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priorities)
                })
                .collect();

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
            let mut sync2_features =
                vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features)
                .push_next(&mut sync2_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let queues = QueueRegistry {
                graphics_queue: device.get_device_queue(selection.graphics, 0),
                compute_queue: device.get_device_queue(selection.compute, 0),
                transfer_queue: device.get_device_queue(selection.transfer, 0),
                graphics_family: selection.graphics,
                compute_family: selection.compute,
                transfer_family: selection.transfer,
            };

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;

            let pool_sizes = descriptor_pool_sizes();
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .pool_sizes(&pool_sizes)
                .max_sets(256);
            let descriptor_pool =
                device.create_descriptor_pool(&pool_info, None).map_err(|e| {
                    engine_error!(
                        "nebula::vulkan",
                        "Failed to create descriptor pool: {:?}",
                        e
                    );
                    Error::InitializationFailed(format!(
                        "Failed to create descriptor pool: {:?}",
                        e
                    ))
                })?;

            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

            let context = Arc::new(GpuContext {
                instance,
                physical_device,
                device,
                allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
                queues,
                surface_loader,
                swapchain_loader,
                upload_pools: Mutex::new(FxHashMap::default()),
                properties,
                #[cfg(feature = "vulkan-validation")]
                debug_messenger,
            });

            let swapchain = Swapchain::new(
                Arc::clone(&context),
                surface,
                queues.graphics_family,
                queues.graphics_family,
                width,
                height,
            )?;

            engine_info!(
                "nebula::vulkan",
                "Vulkan renderer initialized (graphics family {}, compute family {}, transfer family {})",
                queues.graphics_family,
                queues.compute_family,
                queues.transfer_family
            );

            Ok(Self {
                _entry: entry,
                context,
                swapchain: Arc::new(Mutex::new(swapchain)),
                descriptor_pool,
            })
        }
    }
}

impl Renderer for VulkanRenderer {
    fn create_renderpass(&self, config: &RenderpassConfig) -> Result<Arc<dyn RendererRenderpass>> {
        Ok(Arc::new(Renderpass::new(
            Arc::clone(&self.context),
            Arc::clone(&self.swapchain),
            config,
        )?))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn RendererShader>> {
        Ok(Arc::new(Shader::new(Arc::clone(&self.context), desc)?))
    }

    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
    ) -> Result<Arc<dyn RendererGraphicsPipeline>> {
        Ok(Arc::new(GraphicsPipeline::new(
            Arc::clone(&self.context),
            self.descriptor_pool,
            config,
        )?))
    }

    fn create_compute_pipeline(
        &self,
        shader: &Arc<dyn RendererShader>,
    ) -> Result<Arc<dyn RendererComputePipeline>> {
        Ok(Arc::new(ComputePipeline::new(
            Arc::clone(&self.context),
            self.descriptor_pool,
            shader,
        )?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn RendererTexture2D>> {
        Ok(Arc::new(Texture::new_sampled(
            Arc::clone(&self.context),
            desc,
        )?))
    }

    fn create_vertex_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn RendererVertexBuffer>> {
        if desc.usage != BufferUsage::Vertex {
            engine_bail!(
                "nebula::vulkan",
                "create_vertex_buffer called with usage {:?}",
                desc.usage
            );
        }
        Ok(Arc::new(VertexBuffer::new(
            Arc::clone(&self.context),
            desc.size,
            desc.element_count,
        )?))
    }

    fn create_index_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn RendererIndexBuffer>> {
        if desc.usage != BufferUsage::Index {
            engine_bail!(
                "nebula::vulkan",
                "create_index_buffer called with usage {:?}",
                desc.usage
            );
        }
        Ok(Arc::new(IndexBuffer::new(
            Arc::clone(&self.context),
            desc.size,
            desc.element_count,
        )?))
    }

    fn create_storage_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn RendererStorageBuffer>> {
        if desc.usage != BufferUsage::Storage {
            engine_bail!(
                "nebula::vulkan",
                "create_storage_buffer called with usage {:?}",
                desc.usage
            );
        }
        Ok(Arc::new(StorageBuffer::new(
            Arc::clone(&self.context),
            desc.size,
        )?))
    }

    fn create_cmd_buffer(&self) -> Result<Box<dyn RendererCmdBuffer>> {
        Ok(Box::new(CmdBuffer::new(
            Arc::clone(&self.context),
            Arc::clone(&self.swapchain),
        )?))
    }

    fn has_dedicated_compute_queue(&self) -> bool {
        self.context.queues.has_dedicated_compute_queue()
    }

    fn has_dedicated_transfer_queue(&self) -> bool {
        self.context.queues.has_dedicated_transfer_queue()
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.context
                .device
                .device_wait_idle()
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to wait for device: {:?}", e))
        }
    }

    fn on_resized(&self, width: u32, height: u32) -> Result<()> {
        self.swapchain.lock().unwrap().recreate(width, height)
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            self.context.device.device_wait_idle().ok();
            self.context
                .device
                .destroy_descriptor_pool(self.descriptor_pool, None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;
