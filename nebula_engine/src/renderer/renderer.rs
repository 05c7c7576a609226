/// Renderer trait - main rendering factory interface

use std::sync::Arc;

use crate::error::Result;
use crate::renderer::buffer::{BufferDesc, IndexBuffer, StorageBuffer, VertexBuffer};
use crate::renderer::command_buffer::CmdBuffer;
use crate::renderer::pipeline::{
    ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig, Shader, ShaderDesc,
};
use crate::renderer::render_pass::{Renderpass, RenderpassConfig};
use crate::renderer::texture::{Texture2D, TextureDesc};

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Application name
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Nebula Application".to_string(),
            app_version: (1, 0, 0),
        }
    }
}

/// Main renderer trait
///
/// Central factory interface for creating GPU resources, implemented by
/// backend-specific renderers (e.g. VulkanRenderer).
pub trait Renderer: Send + Sync {
    /// Create a renderpass from a declarative config
    fn create_renderpass(&self, config: &RenderpassConfig) -> Result<Arc<dyn Renderpass>>;

    /// Create a shader module (runs SPIR-V reflection)
    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>>;

    /// Create a graphics pipeline
    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
    ) -> Result<Arc<dyn GraphicsPipeline>>;

    /// Create a compute pipeline from a compute shader
    fn create_compute_pipeline(&self, shader: &Arc<dyn Shader>) -> Result<Arc<dyn ComputePipeline>>;

    /// Create a 2D texture
    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture2D>>;

    fn create_vertex_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn VertexBuffer>>;

    fn create_index_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn IndexBuffer>>;

    fn create_storage_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn StorageBuffer>>;

    /// Create the frame command buffer (one per window)
    fn create_cmd_buffer(&self) -> Result<Box<dyn CmdBuffer>>;

    /// True when the device exposes a compute queue family distinct from graphics
    fn has_dedicated_compute_queue(&self) -> bool;

    /// True when the device exposes a transfer queue family distinct from
    /// both graphics and compute
    fn has_dedicated_transfer_queue(&self) -> bool;

    /// Wait for all GPU operations to complete
    fn wait_idle(&self) -> Result<()>;

    /// Notify the renderer that the window has been resized
    fn on_resized(&self, width: u32, height: u32) -> Result<()>;
}
