/// Pipeline configuration, shader reflection data and pipeline traits

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::Result;
use crate::renderer::render_pass::Renderpass;

/// Maximum number of descriptor sets a pipeline layout can carry
pub const MAX_DESCRIPTOR_SETS: usize = 4;

/// Shader stage of a single module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

bitflags! {
    /// Stage visibility of a reflected resource
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStageFlags: u8 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

/// Kind of a reflected descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    InputAttachment,
}

/// One descriptor binding discovered by SPIR-V reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub name: String,
    pub binding_type: BindingType,
    pub count: u32,
    pub stages: ShaderStageFlags,
}

/// One push-constant range discovered by SPIR-V reflection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedPushConstant {
    pub offset: u32,
    pub size: u32,
    pub stages: ShaderStageFlags,
}

/// Reflection data for a whole pipeline (all stages merged)
#[derive(Debug, Clone, Default)]
pub struct PipelineReflection {
    pub bindings: Vec<ReflectedBinding>,
    pub push_constants: Vec<ReflectedPushConstant>,
}

impl PipelineReflection {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge another stage's reflection into this one.
    ///
    /// Bindings sharing (set, binding) merge their stage flags; distinct
    /// bindings are appended. Push-constant ranges sharing an offset merge
    /// stages and keep the larger size.
    pub fn merge(&mut self, other: &PipelineReflection) {
        for binding in &other.bindings {
            match self
                .bindings
                .iter_mut()
                .find(|b| b.set == binding.set && b.binding == binding.binding)
            {
                Some(existing) => existing.stages |= binding.stages,
                None => self.bindings.push(binding.clone()),
            }
        }
        for pc in &other.push_constants {
            match self
                .push_constants
                .iter_mut()
                .find(|p| p.offset == pc.offset)
            {
                Some(existing) => {
                    existing.stages |= pc.stages;
                    existing.size = existing.size.max(pc.size);
                }
                None => self.push_constants.push(*pc),
            }
        }
    }

    /// Highest descriptor set index referenced, or None when no bindings
    pub fn max_set(&self) -> Option<u32> {
        self.bindings.iter().map(|b| b.set).max()
    }
}

/// Shader module resource trait
pub trait Shader: Send + Sync {
    fn stage(&self) -> ShaderStage;
    fn reflection(&self) -> &PipelineReflection;
}

/// Descriptor for creating a shader module
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    /// SPIR-V words as raw bytes (length multiple of 4)
    pub spirv: Vec<u8>,
    pub stage: ShaderStage,
    pub entry_point: String,
}

/// Primitive assembly topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Fixed-function configuration of a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: Arc<dyn Shader>,
    pub fragment_shader: Arc<dyn Shader>,
    pub renderpass: Arc<dyn Renderpass>,
    /// Subpass index this pipeline executes in
    pub subpass: u32,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend_enable: bool,
}

impl std::fmt::Debug for dyn Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shader({:?})", self.stage())
    }
}

impl std::fmt::Debug for dyn Renderpass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Renderpass({} subpasses)", self.subpass_count())
    }
}

/// Graphics pipeline resource trait
pub trait GraphicsPipeline: Send + Sync {
    /// Bind a subpass input attachment to a reflected uniform by name
    fn set_subpass_input(&self, uniform_name: &str, input_attachment: u32) -> Result<()>;

    /// Sample an owned attachment image of a previous renderpass
    fn set_renderpass_input(
        &self,
        shader_name: &str,
        image_index: u32,
        src: &Arc<dyn Renderpass>,
    ) -> Result<()>;

    fn reflection(&self) -> &PipelineReflection;
}

/// Compute pipeline resource trait
pub trait ComputePipeline: Send + Sync {
    /// Bind a storage buffer to a reflected binding by name
    fn set_storage_buffer(
        &self,
        shader_name: &str,
        buffer: &Arc<dyn crate::renderer::buffer::StorageBuffer>,
    ) -> Result<()>;

    fn reflection(&self) -> &PipelineReflection;
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
