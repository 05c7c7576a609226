/// Pipelines - graphics and compute pipeline creation from reflected shaders
///
/// Pipeline layouts are derived entirely from SPIR-V reflection: descriptor
/// set layouts from the merged bindings, push-constant ranges from the
/// merged ranges. Descriptor sets are allocated up front and written through
/// the `set_*` binding methods.

use std::sync::Arc;

use ash::vk;
use nebula_engine::nebula::render::{
    BindingType, ComputePipeline as RendererComputePipeline, CullMode,
    GraphicsPipeline as RendererGraphicsPipeline, GraphicsPipelineConfig, PipelineReflection,
    PrimitiveTopology, Renderpass as RendererRenderpass, Shader as RendererShader,
    ShaderStageFlags, StorageBuffer as RendererStorageBuffer, MAX_DESCRIPTOR_SETS,
};
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_err, engine_trace};

use crate::vulkan_buffer::StorageBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_render_pass::Renderpass;
use crate::vulkan_shader::Shader;

/// View a trait-object shader as the Vulkan implementation
///
/// The backend only ever hands out its own types, so the cast holds.
pub(crate) fn as_vulkan_shader(shader: &Arc<dyn RendererShader>) -> &Shader {
    unsafe { &*(Arc::as_ptr(shader) as *const Shader) }
}

pub(crate) fn as_vulkan_renderpass(renderpass: &Arc<dyn RendererRenderpass>) -> &Renderpass {
    unsafe { &*(Arc::as_ptr(renderpass) as *const Renderpass) }
}

pub(crate) fn as_vulkan_storage_buffer(buffer: &Arc<dyn RendererStorageBuffer>) -> &StorageBuffer {
    unsafe { &*(Arc::as_ptr(buffer) as *const StorageBuffer) }
}

pub(crate) fn as_vulkan_graphics_pipeline(
    pipe: &Arc<dyn RendererGraphicsPipeline>,
) -> &GraphicsPipeline {
    unsafe { &*(Arc::as_ptr(pipe) as *const GraphicsPipeline) }
}

pub(crate) fn as_vulkan_compute_pipeline(
    pipe: &Arc<dyn RendererComputePipeline>,
) -> &ComputePipeline {
    unsafe { &*(Arc::as_ptr(pipe) as *const ComputePipeline) }
}

fn binding_type_to_vk(binding_type: BindingType) -> vk::DescriptorType {
    match binding_type {
        BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        BindingType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

fn stage_flags_to_vk(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

/// Layout objects shared by the two pipeline kinds
struct PipelineLayoutBundle {
    set_layouts: Vec<vk::DescriptorSetLayout>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    layout: vk::PipelineLayout,
    push_constant_stages: vk::ShaderStageFlags,
}

impl PipelineLayoutBundle {
    fn destroy(&self, context: &GpuContext) {
        unsafe {
            context.device.destroy_pipeline_layout(self.layout, None);
            for &set_layout in &self.set_layouts {
                context.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

/// Build descriptor set layouts, descriptor sets and the pipeline layout
/// from merged reflection data
fn build_layout(
    context: &Arc<GpuContext>,
    pool: vk::DescriptorPool,
    reflection: &PipelineReflection,
) -> Result<PipelineLayoutBundle> {
    let set_count = match reflection.max_set() {
        Some(max_set) if (max_set as usize) >= MAX_DESCRIPTOR_SETS => {
            return Err(Error::InvalidResource(format!(
                "Shader uses descriptor set {}, capacity is {}",
                max_set, MAX_DESCRIPTOR_SETS
            )));
        }
        Some(max_set) => max_set as usize + 1,
        None => 0,
    };

    let mut set_layouts = Vec::with_capacity(set_count);
    for set in 0..set_count as u32 {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = reflection
            .bindings
            .iter()
            .filter(|b| b.set == set)
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(binding_type_to_vk(b.binding_type))
                    .descriptor_count(b.count.max(1))
                    .stage_flags(stage_flags_to_vk(b.stages))
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe {
            context
                .device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to create descriptor set layout: {:?}", e)
                })?
        };
        set_layouts.push(set_layout);
    }

    let descriptor_sets = if set_layouts.is_empty() {
        Vec::new()
    } else {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        unsafe {
            context
                .device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to allocate descriptor sets: {:?}", e)
                })?
        }
    };

    let mut push_constant_stages = vk::ShaderStageFlags::empty();
    let push_ranges: Vec<vk::PushConstantRange> = reflection
        .push_constants
        .iter()
        .map(|pc| {
            let stages = stage_flags_to_vk(pc.stages);
            push_constant_stages |= stages;
            vk::PushConstantRange {
                stage_flags: stages,
                offset: pc.offset,
                size: pc.size,
            }
        })
        .collect();

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    let layout = unsafe {
        context
            .device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to create pipeline layout: {:?}", e)
            })?
    };

    Ok(PipelineLayoutBundle {
        set_layouts,
        descriptor_sets,
        layout,
        push_constant_stages,
    })
}

/// Vulkan graphics pipeline
pub struct GraphicsPipeline {
    context: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    bundle: PipelineLayoutBundle,
    reflection: PipelineReflection,
    /// Keeps the renderpass alive; recorded draws reference its framebuffers
    pub(crate) renderpass: Arc<dyn RendererRenderpass>,
    pub(crate) subpass: u32,
}

impl GraphicsPipeline {
    pub(crate) fn new(
        context: Arc<GpuContext>,
        pool: vk::DescriptorPool,
        config: &GraphicsPipelineConfig,
    ) -> Result<Self> {
        let vertex = as_vulkan_shader(&config.vertex_shader);
        let fragment = as_vulkan_shader(&config.fragment_shader);
        let renderpass = as_vulkan_renderpass(&config.renderpass);

        let mut reflection = vertex.reflection().clone();
        reflection.merge(fragment.reflection());

        let bundle = build_layout(&context, pool, &reflection)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.module)
                .name(&vertex.entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.module)
                .name(&fragment.entry_point),
        ];

        // Geometry is pulled from storage/vertex buffers bound at draw time
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(config.topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(cull_mode_to_vk(config.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test && renderpass.has_depth(config.subpass))
            .depth_write_enable(config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let color_count = renderpass.color_attachment_count(config.subpass)?;
        let blend_attachment = if config.blend_enable {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = vec![blend_attachment; color_count];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(bundle.layout)
            .render_pass(renderpass.vk_render_pass())
            .subpass(config.subpass);

        let pipeline = unsafe {
            context
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| {
                    bundle.destroy(&context);
                    engine_err!("nebula::vulkan", "Failed to create graphics pipeline: {:?}", e)
                })?[0]
        };

        engine_trace!(
            "nebula::vulkan",
            "Graphics pipeline created for subpass {}: {} descriptor sets, {} push-constant ranges",
            config.subpass,
            bundle.descriptor_sets.len(),
            reflection.push_constants.len()
        );

        Ok(Self {
            context,
            pipeline,
            bundle,
            reflection,
            renderpass: config.renderpass.clone(),
            subpass: config.subpass,
        })
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.bundle.layout
    }

    pub(crate) fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.bundle.descriptor_sets
    }

    pub(crate) fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.bundle.push_constant_stages
    }

    fn find_binding(&self, name: &str, binding_type: BindingType) -> Result<(u32, u32)> {
        self.reflection
            .bindings
            .iter()
            .find(|b| b.name == name && b.binding_type == binding_type)
            .map(|b| (b.set, b.binding))
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "No reflected {:?} binding named {:?}",
                    binding_type, name
                ))
            })
    }

    fn write_image_descriptor(
        &self,
        set: u32,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        image_info: vk::DescriptorImageInfo,
    ) -> Result<()> {
        let descriptor_set = self
            .bundle
            .descriptor_sets
            .get(set as usize)
            .copied()
            .ok_or_else(|| {
                Error::InvalidResource(format!("Pipeline has no descriptor set {}", set))
            })?;

        let image_infos = [image_info];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .image_info(&image_infos);
        unsafe {
            self.context.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }
}

impl RendererGraphicsPipeline for GraphicsPipeline {
    fn set_subpass_input(&self, uniform_name: &str, input_attachment: u32) -> Result<()> {
        let (set, binding) = self.find_binding(uniform_name, BindingType::InputAttachment)?;
        let renderpass = as_vulkan_renderpass(&self.renderpass);
        let image = renderpass.attachment_image(input_attachment)?;

        self.write_image_descriptor(
            set,
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: image.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        )
    }

    fn set_renderpass_input(
        &self,
        shader_name: &str,
        image_index: u32,
        src: &Arc<dyn RendererRenderpass>,
    ) -> Result<()> {
        let (set, binding) = self.find_binding(shader_name, BindingType::CombinedImageSampler)?;
        let source = as_vulkan_renderpass(src);
        let image = source.attachment_image(image_index)?;

        self.write_image_descriptor(
            set,
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorImageInfo {
                sampler: image.vk_sampler(),
                image_view: image.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        )
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
        }
        self.bundle.destroy(&self.context);
    }
}

/// Vulkan compute pipeline
pub struct ComputePipeline {
    context: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    bundle: PipelineLayoutBundle,
    reflection: PipelineReflection,
}

impl ComputePipeline {
    pub(crate) fn new(
        context: Arc<GpuContext>,
        pool: vk::DescriptorPool,
        shader: &Arc<dyn RendererShader>,
    ) -> Result<Self> {
        let compute = as_vulkan_shader(shader);
        let reflection = compute.reflection().clone();
        let bundle = build_layout(&context, pool, &reflection)?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(compute.module)
            .name(&compute.entry_point);

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(bundle.layout);

        let pipeline = unsafe {
            context
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| {
                    bundle.destroy(&context);
                    engine_err!("nebula::vulkan", "Failed to create compute pipeline: {:?}", e)
                })?[0]
        };

        Ok(Self {
            context,
            pipeline,
            bundle,
            reflection,
        })
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.bundle.layout
    }

    pub(crate) fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.bundle.descriptor_sets
    }
}

impl RendererComputePipeline for ComputePipeline {
    fn set_storage_buffer(
        &self,
        shader_name: &str,
        buffer: &Arc<dyn RendererStorageBuffer>,
    ) -> Result<()> {
        let binding = self
            .reflection
            .bindings
            .iter()
            .find(|b| b.name == shader_name && b.binding_type == BindingType::StorageBuffer)
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "No reflected storage buffer named {:?}",
                    shader_name
                ))
            })?;

        let descriptor_set = self
            .bundle
            .descriptor_sets
            .get(binding.set as usize)
            .copied()
            .ok_or_else(|| {
                Error::InvalidResource(format!("Pipeline has no descriptor set {}", binding.set))
            })?;

        let vk_buffer = as_vulkan_storage_buffer(buffer);
        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: vk_buffer.vk_buffer(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(binding.binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_infos);
        unsafe {
            self.context.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
        }
        self.bundle.destroy(&self.context);
    }
}
