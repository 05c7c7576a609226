/// Texture - Vulkan implementation of the Texture2D trait
///
/// Covers sampled textures (with optional mip chain generation on upload)
/// and the owned attachment images renderpasses render into.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use nebula_engine::engine_bail;
use nebula_engine::nebula::render::{
    AttachmentUsage, ImageFormat, Sampler, SamplerAddressMode, SamplerBorderColor, SamplerFilter,
    Texture2D, TextureDesc,
};
use nebula_engine::nebula::{Error, Result};

use crate::vulkan::image_format_to_vk;
use crate::vulkan_buffer::Buffer;
use crate::vulkan_context::GpuContext;

fn filter_to_vk(filter: SamplerFilter) -> vk::Filter {
    match filter {
        SamplerFilter::Nearest => vk::Filter::NEAREST,
        SamplerFilter::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode_to_vk(mode: SamplerAddressMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

fn border_color_to_vk(color: SamplerBorderColor) -> vk::BorderColor {
    match color {
        SamplerBorderColor::TransparentInt => vk::BorderColor::INT_TRANSPARENT_BLACK,
        SamplerBorderColor::BlackInt => vk::BorderColor::INT_OPAQUE_BLACK,
        SamplerBorderColor::WhiteInt => vk::BorderColor::INT_OPAQUE_WHITE,
    }
}

fn bytes_per_pixel(format: ImageFormat) -> Option<u64> {
    match format {
        ImageFormat::R8Uint => Some(1),
        ImageFormat::Rgb8 => Some(3),
        ImageFormat::Rgba8 => Some(4),
        ImageFormat::Rgba32Float => Some(16),
        _ => None,
    }
}

/// Mutable part of a texture, replaced wholesale on resize
struct TextureInner {
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
    width: u32,
    height: u32,
    mip_levels: u32,
}

/// Vulkan 2D texture / attachment image
pub struct Texture {
    context: Arc<GpuContext>,
    inner: Mutex<TextureInner>,
    sampler: vk::Sampler,
    format: ImageFormat,
    vk_format: vk::Format,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
    mipmapped: bool,
}

impl Texture {
    /// Create a sampled texture; contents arrive through `set_data`
    pub(crate) fn new_sampled(context: Arc<GpuContext>, desc: &TextureDesc) -> Result<Self> {
        let vk_format = image_format_to_vk(desc.format, vk::Format::UNDEFINED);
        if vk_format == vk::Format::UNDEFINED || desc.format.is_depth() {
            return Err(Error::InvalidResource(format!(
                "Format {:?} is not a sampled texture format",
                desc.format
            )));
        }

        let mip_levels = if desc.mipmapped {
            32 - desc.width.max(desc.height).leading_zeros()
        } else {
            1
        };

        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.mipmapped {
            // Mip generation blits from the previous level
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let (image, allocation, view) = create_image(
            &context,
            vk_format,
            desc.width,
            desc.height,
            mip_levels,
            usage,
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = create_vk_sampler(&context, &desc.sampler, mip_levels)?;

        Ok(Self {
            context,
            inner: Mutex::new(TextureInner {
                image,
                allocation: Some(allocation),
                view,
                width: desc.width,
                height: desc.height,
                mip_levels,
            }),
            sampler,
            format: desc.format,
            vk_format,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            mipmapped: desc.mipmapped,
        })
    }

    /// Create an attachment image owned by a renderpass
    pub(crate) fn new_attachment(
        context: Arc<GpuContext>,
        format: ImageFormat,
        vk_format: vk::Format,
        width: u32,
        height: u32,
        attachment_usage: AttachmentUsage,
        sampler_desc: &Sampler,
    ) -> Result<Self> {
        let is_depth = attachment_usage.contains(AttachmentUsage::DEPTH_ATTACHMENT);

        let mut usage = if is_depth {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
        if attachment_usage.contains(AttachmentUsage::SUBPASS_INPUT) {
            usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
        }
        if attachment_usage.contains(AttachmentUsage::RENDERPASS_INPUT) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        let aspect = if is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let (image, allocation, view) =
            create_image(&context, vk_format, width, height, 1, usage, aspect)?;
        let sampler = create_vk_sampler(&context, sampler_desc, 1)?;

        Ok(Self {
            context,
            inner: Mutex::new(TextureInner {
                image,
                allocation: Some(allocation),
                view,
                width,
                height,
                mip_levels: 1,
            }),
            sampler,
            format,
            vk_format,
            usage,
            aspect,
            mipmapped: false,
        })
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.inner.lock().unwrap().view
    }

    pub(crate) fn vk_sampler(&self) -> vk::Sampler {
        self.sampler
    }

    fn destroy_inner(&self, inner: &mut TextureInner) {
        unsafe {
            self.context.device.destroy_image_view(inner.view, None);
            self.context.device.destroy_image(inner.image, None);
        }
        if let (Some(allocation), Ok(mut allocator)) =
            (inner.allocation.take(), self.context.allocator.lock())
        {
            let _ = allocator.free(allocation);
        }
    }
}

impl Texture2D for Texture {
    fn set_data(&self, data: &[u8]) -> Result<()> {
        let Some(pixel_size) = bytes_per_pixel(self.format) else {
            engine_bail!(
                "nebula::vulkan",
                "set_data is not supported for format {:?}",
                self.format
            );
        };

        let inner = self.inner.lock().unwrap();
        let expected = inner.width as u64 * inner.height as u64 * pixel_size;
        if data.len() as u64 != expected {
            engine_bail!(
                "nebula::vulkan",
                "set_data size mismatch: got {} bytes, expected {}",
                data.len(),
                expected
            );
        }

        let staging = Buffer::new(
            self.context.clone(),
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;
        staging.update(0, data)?;

        let family = self.context.queues.graphics_family;
        let cb = self.context.begin_single_time_commands(family)?;
        let device = &self.context.device;

        unsafe {
            let full_range = vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: inner.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            };

            // UNDEFINED -> TRANSFER_DST for the whole chain
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(inner.image)
                .subresource_range(full_range)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width: inner.width,
                    height: inner.height,
                    depth: 1,
                },
            };
            device.cmd_copy_buffer_to_image(
                cb,
                staging.buffer,
                inner.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            if self.mipmapped && inner.mip_levels > 1 {
                generate_mipmaps(
                    device,
                    cb,
                    inner.image,
                    inner.width,
                    inner.height,
                    inner.mip_levels,
                );
            } else {
                let to_shader = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(inner.image)
                    .subresource_range(full_range)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_shader],
                );
            }
        }

        self.context.end_single_time_commands(cb, family)
    }

    fn resize(&self, new_width: u32, new_height: u32) -> Result<()> {
        let mip_levels = if self.mipmapped {
            32 - new_width.max(new_height).leading_zeros()
        } else {
            1
        };

        let (image, allocation, view) = create_image(
            &self.context,
            self.vk_format,
            new_width,
            new_height,
            mip_levels,
            self.usage,
            self.aspect,
        )?;

        let mut inner = self.inner.lock().unwrap();
        self.destroy_inner(&mut inner);
        *inner = TextureInner {
            image,
            allocation: Some(allocation),
            view,
            width: new_width,
            height: new_height,
            mip_levels,
        };
        Ok(())
    }

    fn width(&self) -> u32 {
        self.inner.lock().unwrap().width
    }

    fn height(&self) -> u32 {
        self.inner.lock().unwrap().height
    }

    fn format(&self) -> ImageFormat {
        self.format
    }

    fn mip_level_count(&self) -> u8 {
        self.inner.lock().unwrap().mip_levels as u8
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_sampler(self.sampler, None);
        }
        if let Ok(mut inner) = self.inner.lock() {
            self.destroy_inner(&mut inner);
        }
    }
}

fn create_image(
    context: &Arc<GpuContext>,
    format: vk::Format,
    width: u32,
    height: u32,
    mip_levels: u32,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
) -> Result<(vk::Image, Allocation, vk::ImageView)> {
    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(mip_levels)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe {
        context.device.create_image(&image_info, None).map_err(|e| {
            nebula_engine::engine_err!("nebula::vulkan", "Failed to create image: {:?}", e)
        })?
    };

    let requirements = unsafe { context.device.get_image_memory_requirements(image) };
    let allocation = context
        .allocator
        .lock()
        .map_err(|_| Error::BackendError("Allocator mutex poisoned".to_string()))?
        .allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { context.device.destroy_image(image, None) };
            nebula_engine::engine_error!(
                "nebula::vulkan",
                "Image allocation {}x{} {:?} failed: {:?}",
                width,
                height,
                format,
                e
            );
            Error::OutOfMemory
        })?;

    unsafe {
        context
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .map_err(|e| {
                nebula_engine::engine_err!("nebula::vulkan", "Failed to bind image memory: {:?}", e)
            })?;
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });
    let view = unsafe {
        context.device.create_image_view(&view_info, None).map_err(|e| {
            nebula_engine::engine_err!("nebula::vulkan", "Failed to create image view: {:?}", e)
        })?
    };

    Ok((image, allocation, view))
}

fn create_vk_sampler(
    context: &Arc<GpuContext>,
    desc: &Sampler,
    mip_levels: u32,
) -> Result<vk::Sampler> {
    let address_mode = address_mode_to_vk(desc.address_mode);
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter_to_vk(desc.filter))
        .min_filter(filter_to_vk(desc.filter))
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .anisotropy_enable(true)
        .max_anisotropy(context.properties.limits.max_sampler_anisotropy)
        .border_color(border_color_to_vk(desc.border_color))
        .min_lod(0.0)
        .max_lod(mip_levels as f32);

    unsafe {
        context.device.create_sampler(&sampler_info, None).map_err(|e| {
            nebula_engine::engine_err!("nebula::vulkan", "Failed to create sampler: {:?}", e)
        })
    }
}

/// Blit each mip level from the previous one, leaving the whole chain in
/// SHADER_READ_ONLY_OPTIMAL
fn generate_mipmaps(
    device: &ash::Device,
    cb: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    unsafe {
        for level in 1..mip_levels {
            let src_range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: level - 1,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };

            // Previous level: TRANSFER_DST -> TRANSFER_SRC
            let to_src = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(src_range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_src],
            );

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);

            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                src_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_width,
                        y: mip_height,
                        z: 1,
                    },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                dst_offsets: [
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ],
            };
            device.cmd_blit_image(
                cb,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            // Previous level is finished: TRANSFER_SRC -> SHADER_READ_ONLY
            let to_shader = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(src_range)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );

            mip_width = next_width;
            mip_height = next_height;
        }

        // Last level never became a blit source
        let last_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: mip_levels - 1,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_shader = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(last_range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        device.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_shader],
        );
    }
}
