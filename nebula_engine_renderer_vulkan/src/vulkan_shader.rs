/// Shader - SPIR-V module with reflection
///
/// Wraps a `VkShaderModule` plus the descriptor and push-constant layout
/// reflected from the SPIR-V with spirq. Pipelines merge the per-stage
/// reflections into their layouts.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use nebula_engine::nebula::render::{
    BindingType, PipelineReflection, ReflectedBinding, ReflectedPushConstant,
    Shader as RendererShader, ShaderDesc, ShaderStage, ShaderStageFlags,
};
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_bail, engine_err, engine_trace, engine_warn};

use crate::vulkan_context::GpuContext;

/// Vulkan shader module
pub struct Shader {
    context: Arc<GpuContext>,
    pub(crate) module: vk::ShaderModule,
    stage: ShaderStage,
    pub(crate) entry_point: CString,
    reflection: PipelineReflection,
}

impl Shader {
    pub(crate) fn new(context: Arc<GpuContext>, desc: &ShaderDesc) -> Result<Self> {
        if desc.spirv.is_empty() || desc.spirv.len() % 4 != 0 {
            engine_bail!(
                "nebula::vulkan",
                "SPIR-V byte length {} is not a multiple of 4",
                desc.spirv.len()
            );
        }

        let words: Vec<u32> = desc
            .spirv
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let reflection = reflect_spirv(&words, &desc.entry_point, desc.stage)?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe {
            context
                .device
                .create_shader_module(&module_info, None)
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to create shader module: {:?}", e)
                })?
        };

        let entry_point = CString::new(desc.entry_point.as_str()).map_err(|_| {
            Error::InvalidResource(format!(
                "Entry point name contains a NUL byte: {:?}",
                desc.entry_point
            ))
        })?;

        engine_trace!(
            "nebula::vulkan",
            "Shader created: stage {:?}, {} bindings, {} push-constant ranges",
            desc.stage,
            reflection.bindings.len(),
            reflection.push_constants.len()
        );

        Ok(Self {
            context,
            module,
            stage: desc.stage,
            entry_point,
            reflection,
        })
    }

    pub(crate) fn vk_stage(&self) -> vk::ShaderStageFlags {
        match self.stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

impl RendererShader for Shader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Reflect one stage's descriptor bindings and push constants
fn reflect_spirv(
    words: &[u32],
    entry_point: &str,
    stage: ShaderStage,
) -> Result<PipelineReflection> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(words.to_vec())
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| engine_err!("nebula::vulkan", "SPIR-V reflection failed: {:?}", e))?;

    let entry = entry_points
        .iter()
        .find(|ep| ep.name == entry_point)
        .ok_or_else(|| {
            Error::InvalidResource(format!(
                "Entry point {:?} not found in SPIR-V module",
                entry_point
            ))
        })?;

    let stages = ShaderStageFlags::from(stage);
    let mut reflection = PipelineReflection::empty();

    for var in &entry.vars {
        match var {
            spirq::var::Variable::Descriptor {
                name,
                desc_bind,
                desc_ty,
                nbind,
                ..
            } => {
                let binding_type = match desc_ty {
                    spirq::ty::DescriptorType::UniformBuffer() => BindingType::UniformBuffer,
                    spirq::ty::DescriptorType::StorageBuffer(_) => BindingType::StorageBuffer,
                    spirq::ty::DescriptorType::CombinedImageSampler()
                    | spirq::ty::DescriptorType::SampledImage()
                    | spirq::ty::DescriptorType::Sampler() => BindingType::CombinedImageSampler,
                    spirq::ty::DescriptorType::InputAttachment(_) => BindingType::InputAttachment,
                    other => {
                        engine_warn!(
                            "nebula::vulkan",
                            "Skipping unsupported descriptor type {:?} in reflection",
                            other
                        );
                        continue;
                    }
                };

                reflection.bindings.push(ReflectedBinding {
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    name: name.clone().unwrap_or_default(),
                    binding_type,
                    count: *nbind,
                    stages,
                });
            }
            spirq::var::Variable::PushConstant { ty, .. } => {
                let size = ty.nbyte().unwrap_or(0) as u32;
                if size > 0 {
                    reflection.push_constants.push(ReflectedPushConstant {
                        offset: 0,
                        size,
                        stages,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(reflection)
}
