/// Mock Renderer for unit tests (no GPU required)
///
/// The mock backend implements the renderer traits with plain data so that
/// frame cycling, fence discipline, cross-queue sync registration and queue
/// ownership transfers can be tested without a GPU.

#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use glam::Vec4;

#[cfg(test)]
use crate::engine_bail;
#[cfg(test)]
use crate::error::{Error, Result};
#[cfg(test)]
use crate::renderer::{
    AccessFlags, AttachmentUsage, BufferDesc, CmdBuffer, ComputePipeline, GraphicsPipeline,
    GraphicsPipelineConfig, IndexBuffer, PipelineReflection, PipelineStages, Renderer, Renderpass,
    RenderpassConfig, Shader, ShaderDesc, ShaderStage, StorageBuffer, Texture2D, TextureDesc,
    VertexBuffer, Viewport, ImageFormat, MAX_FRAMES_IN_FLIGHT, MAX_SUBPASS_ATTACHMENTS,
};

// ============================================================================
// Mock resources
// ============================================================================

#[cfg(test)]
pub struct MockTexture {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

#[cfg(test)]
impl Texture2D for MockTexture {
    fn set_data(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn resize(&self, _new_width: u32, _new_height: u32) -> Result<()> {
        Ok(())
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> ImageFormat {
        self.format
    }

    fn mip_level_count(&self) -> u8 {
        1
    }
}

#[cfg(test)]
pub struct MockStorageBuffer {
    pub size: u64,
}

#[cfg(test)]
impl StorageBuffer for MockStorageBuffer {
    fn update(&self, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
pub struct MockVertexBuffer {
    pub vertex_count: u32,
}

#[cfg(test)]
impl VertexBuffer for MockVertexBuffer {
    fn update(&self, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

#[cfg(test)]
pub struct MockIndexBuffer {
    pub index_count: u32,
}

#[cfg(test)]
impl IndexBuffer for MockIndexBuffer {
    fn update(&self, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
pub struct MockShader {
    pub stage: ShaderStage,
    pub reflection: PipelineReflection,
}

#[cfg(test)]
impl Shader for MockShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

#[cfg(test)]
pub struct MockRenderpass {
    pub subpass_count: u32,
    pub attachment_count: u32,
    pub clear_color: Mutex<Vec4>,
    pub resized_to: Mutex<Option<(u32, u32)>>,
}

#[cfg(test)]
impl Renderpass for MockRenderpass {
    fn set_clear_color(&self, color: Vec4) -> Result<()> {
        *self.clear_color.lock().unwrap() = color;
        Ok(())
    }

    fn on_resized(&self, width: u32, height: u32) -> Result<()> {
        *self.resized_to.lock().unwrap() = Some((width, height));
        Ok(())
    }

    fn subpass_count(&self) -> u32 {
        self.subpass_count
    }

    fn attachment_count(&self) -> u32 {
        self.attachment_count
    }
}

#[cfg(test)]
pub struct MockGraphicsPipeline {
    pub reflection: PipelineReflection,
    pub subpass: u32,
}

#[cfg(test)]
impl GraphicsPipeline for MockGraphicsPipeline {
    fn set_subpass_input(&self, _uniform_name: &str, _input_attachment: u32) -> Result<()> {
        Ok(())
    }

    fn set_renderpass_input(
        &self,
        _shader_name: &str,
        _image_index: u32,
        _src: &Arc<dyn Renderpass>,
    ) -> Result<()> {
        Ok(())
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

#[cfg(test)]
pub struct MockComputePipeline {
    pub reflection: PipelineReflection,
}

#[cfg(test)]
impl ComputePipeline for MockComputePipeline {
    fn set_storage_buffer(&self, _shader_name: &str, _buffer: &Arc<dyn StorageBuffer>) -> Result<()> {
        Ok(())
    }

    fn reflection(&self) -> &PipelineReflection {
        &self.reflection
    }
}

// ============================================================================
// Mock CmdBuffer - simulates the multi-queue sync engine on plain data
// ============================================================================

/// One recorded queue ownership transfer barrier
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipBarrier {
    pub src_family: u32,
    pub dst_family: u32,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    /// Queue the barrier was recorded on ("graphics" or "compute")
    pub recorded_on: &'static str,
}

#[cfg(test)]
pub struct MockCmdBuffer {
    current_frame: usize,
    is_recording: bool,
    in_render_pass: bool,
    transfer_recording: bool,
    compute_recording: bool,

    graphics_family: u32,
    compute_family: u32,

    sync_with_transfer: bool,
    sync_with_compute: bool,

    /// Per-frame wait/signal semaphore names, seeded like the real backend
    pub wait_semaphores: [Vec<String>; MAX_FRAMES_IN_FLIGHT],
    pub signal_semaphores: [Vec<String>; MAX_FRAMES_IN_FLIGHT],
    pub wait_stages: Vec<PipelineStages>,
    pub signal_stages: Vec<PipelineStages>,

    /// Fence index waited on per begin() call
    pub fence_waits: Vec<usize>,
    /// Per-frame in-flight fence state, signaled at creation
    fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    /// Makes the next begin() fail its image acquire
    pub fail_next_acquire: bool,
    /// Makes the next begin() report a suboptimal swapchain
    pub suboptimal_next_acquire: bool,
    /// Recorded events ("begin", "submit:frame=0", ...)
    pub events: Vec<String>,
    pub barriers: Vec<OwnershipBarrier>,
}

#[cfg(test)]
impl MockCmdBuffer {
    pub fn new(graphics_family: u32, compute_family: u32) -> Self {
        let mut wait_semaphores: [Vec<String>; MAX_FRAMES_IN_FLIGHT] = Default::default();
        let mut signal_semaphores: [Vec<String>; MAX_FRAMES_IN_FLIGHT] = Default::default();
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            wait_semaphores[frame].push(format!("image_available[{}]", frame));
            signal_semaphores[frame].push(format!("render_complete[{}]", frame));
        }
        Self {
            current_frame: 0,
            is_recording: false,
            in_render_pass: false,
            transfer_recording: false,
            compute_recording: false,
            graphics_family,
            compute_family,
            sync_with_transfer: false,
            sync_with_compute: false,
            wait_semaphores,
            signal_semaphores,
            wait_stages: vec![PipelineStages::COLOR_ATTACHMENT_OUTPUT],
            signal_stages: vec![PipelineStages::COLOR_ATTACHMENT_OUTPUT],
            fence_waits: Vec::new(),
            fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
            fail_next_acquire: false,
            suboptimal_next_acquire: false,
            events: Vec::new(),
            barriers: Vec::new(),
        }
    }

    fn has_dedicated_compute_queue(&self) -> bool {
        self.compute_family != self.graphics_family
    }
}

#[cfg(test)]
impl CmdBuffer for MockCmdBuffer {
    fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            engine_bail!("nebula::mock", "begin() called while already recording");
        }
        if !self.fence_signaled[self.current_frame] {
            engine_bail!(
                "nebula::mock",
                "frame {} fence was never signaled",
                self.current_frame
            );
        }
        self.fence_waits.push(self.current_frame);
        if self.fail_next_acquire {
            self.fail_next_acquire = false;
            engine_bail!("nebula::mock", "failed to acquire swapchain image");
        }
        if self.suboptimal_next_acquire {
            self.suboptimal_next_acquire = false;
            // A suboptimal image still renders; recreation waits for the
            // next frame boundary
            self.events.push("schedule_recreate".to_string());
        }
        // The fence resets only once an image acquire succeeds
        self.fence_signaled[self.current_frame] = false;
        self.is_recording = true;
        self.events.push(format!("begin:frame={}", self.current_frame));
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.is_recording {
            engine_bail!("nebula::mock", "end() called without begin()");
        }
        if self.in_render_pass {
            engine_bail!("nebula::mock", "end() called inside a render pass");
        }
        self.is_recording = false;
        self.events.push(format!("end:frame={}", self.current_frame));
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        if self.is_recording {
            engine_bail!("nebula::mock", "submit() called before end()");
        }
        // Scene batch + overlay batch, fenced on the frame's in-flight fence
        self.events.push(format!(
            "submit:frame={}:waits={}:signals={}",
            self.current_frame,
            self.wait_semaphores[self.current_frame].join(","),
            self.signal_semaphores[self.current_frame].join(","),
        ));
        self.events.push(format!(
            "submit_overlay:frame={}:waits=render_complete[{}]",
            self.current_frame, self.current_frame
        ));
        self.fence_signaled[self.current_frame] = true;
        Ok(())
    }

    fn queue_present(&mut self) -> Result<()> {
        self.events.push(format!(
            "present:frame={}:waits=overlay_complete[{}]",
            self.current_frame, self.current_frame
        ));
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }

    fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
        self.events.push("set_viewport".to_string());
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        _pipe: &Arc<dyn GraphicsPipeline>,
        _push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if !self.is_recording {
            engine_bail!("nebula::mock", "begin_render_pass() outside begin()/end()");
        }
        if self.in_render_pass {
            engine_bail!("nebula::mock", "begin_render_pass() while already in a render pass");
        }
        self.in_render_pass = true;
        self.events.push("begin_render_pass".to_string());
        Ok(())
    }

    fn next_subpass(
        &mut self,
        _pipe: &Arc<dyn GraphicsPipeline>,
        _push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::mock", "next_subpass() outside a render pass");
        }
        self.events.push("next_subpass".to_string());
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::mock", "end_render_pass() without begin_render_pass()");
        }
        self.in_render_pass = false;
        self.events.push("end_render_pass".to_string());
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::mock", "draw() outside a render pass");
        }
        self.events.push(format!("draw:{}:{}", vertex_count, first_vertex));
        Ok(())
    }

    fn draw_buffer(&mut self, vertex_buffer: &Arc<dyn VertexBuffer>) -> Result<()> {
        self.draw(vertex_buffer.vertex_count(), 0)
    }

    fn draw_indexed(
        &mut self,
        _vertex_buffer: &Arc<dyn VertexBuffer>,
        index_buffer: &Arc<dyn IndexBuffer>,
        index_count: u32,
    ) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::mock", "draw_indexed() outside a render pass");
        }
        let count = if index_count == 0 {
            index_buffer.index_count()
        } else {
            index_count
        };
        self.events.push(format!("draw_indexed:{}", count));
        Ok(())
    }

    fn begin_transfer(&mut self) -> Result<()> {
        if self.transfer_recording {
            engine_bail!("nebula::mock", "begin_transfer() while already recording");
        }
        self.transfer_recording = true;
        self.events.push(format!("begin_transfer:frame={}", self.current_frame));
        Ok(())
    }

    fn submit_transfer(&mut self, graphics_wait_stage: PipelineStages) -> Result<()> {
        if !self.transfer_recording {
            engine_bail!("nebula::mock", "submit_transfer() without begin_transfer()");
        }
        self.sync_with_transfer_queue(graphics_wait_stage, PipelineStages::TRANSFER);
        self.transfer_recording = false;
        self.events.push(format!(
            "submit_transfer:frame={}:signals=transfer[{}]",
            self.current_frame, self.current_frame
        ));
        Ok(())
    }

    fn begin_compute(
        &mut self,
        _pipe: &Arc<dyn ComputePipeline>,
        descriptor_set: u32,
        _push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if self.compute_recording {
            engine_bail!("nebula::mock", "begin_compute() while already recording");
        }
        self.compute_recording = true;
        self.events.push(format!(
            "begin_compute:frame={}:set={}",
            self.current_frame, descriptor_set
        ));
        Ok(())
    }

    fn submit_compute(&mut self, graphics_wait_stage: PipelineStages) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::mock", "submit_compute() without begin_compute()");
        }
        self.sync_with_compute_queue(graphics_wait_stage, PipelineStages::COMPUTE_SHADER);
        self.compute_recording = false;
        self.events.push(format!(
            "submit_compute:frame={}:waits=compute_ready[{}]:signals=compute_complete[{}]",
            self.current_frame, self.current_frame, self.current_frame
        ));
        Ok(())
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::mock", "dispatch() without begin_compute()");
        }
        self.events
            .push(format!("dispatch:{}:{}:{}", group_x, group_y, group_z));
        Ok(())
    }

    fn acquire_from_graphics_queue(
        &mut self,
        _buffer: &Arc<dyn StorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()> {
        if self.has_dedicated_compute_queue() {
            self.barriers.push(OwnershipBarrier {
                src_family: self.graphics_family,
                dst_family: self.compute_family,
                src_stage: PipelineStages::TOP_OF_PIPE,
                dst_stage,
                src_access: AccessFlags::empty(),
                dst_access,
                recorded_on: "compute",
            });
        }
        Ok(())
    }

    fn release_to_graphics_queue(
        &mut self,
        _buffer: &Arc<dyn StorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()> {
        if self.has_dedicated_compute_queue() {
            self.barriers.push(OwnershipBarrier {
                src_family: self.compute_family,
                dst_family: self.graphics_family,
                src_stage,
                dst_stage: PipelineStages::BOTTOM_OF_PIPE,
                src_access,
                dst_access: AccessFlags::empty(),
                recorded_on: "compute",
            });
        }
        Ok(())
    }

    fn acquire_from_compute_queue(
        &mut self,
        _buffer: &Arc<dyn StorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()> {
        if self.has_dedicated_compute_queue() {
            self.barriers.push(OwnershipBarrier {
                src_family: self.compute_family,
                dst_family: self.graphics_family,
                src_stage: PipelineStages::TOP_OF_PIPE,
                dst_stage,
                src_access: AccessFlags::empty(),
                dst_access,
                recorded_on: "graphics",
            });
        }
        Ok(())
    }

    fn release_to_compute_queue(
        &mut self,
        _buffer: &Arc<dyn StorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()> {
        if self.has_dedicated_compute_queue() {
            self.barriers.push(OwnershipBarrier {
                src_family: self.graphics_family,
                dst_family: self.compute_family,
                src_stage,
                dst_stage: PipelineStages::BOTTOM_OF_PIPE,
                src_access,
                dst_access: AccessFlags::empty(),
                recorded_on: "graphics",
            });
        }
        Ok(())
    }

    fn sync_with_transfer_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    ) {
        if self.sync_with_transfer {
            return;
        }
        self.sync_with_transfer = true;
        self.wait_stages.push(wait_stage);
        if !signal_stage.is_empty() {
            self.signal_stages.push(signal_stage);
        }
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            self.wait_semaphores[frame].push(format!("transfer[{}]", frame));
        }
    }

    fn sync_with_compute_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    ) {
        if self.sync_with_compute {
            return;
        }
        self.sync_with_compute = true;
        self.wait_stages.push(wait_stage);
        self.signal_stages.push(if signal_stage.is_empty() {
            PipelineStages::COMPUTE_SHADER
        } else {
            signal_stage
        });
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            self.wait_semaphores[frame].push(format!("compute_complete[{}]", frame));
            self.signal_semaphores[frame].push(format!("compute_ready[{}]", frame));
        }
    }

    fn current_frame(&self) -> u32 {
        self.current_frame as u32
    }
}

// ============================================================================
// Mock Renderer
// ============================================================================

/// Mock Renderer that validates configs and tracks created resources
#[cfg(test)]
pub struct MockRenderer {
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
    pub created_renderpasses: Mutex<Vec<u32>>,
}

#[cfg(test)]
impl MockRenderer {
    pub fn new() -> Self {
        // Dedicated compute and transfer families by default
        Self {
            graphics_family: 0,
            compute_family: 1,
            transfer_family: 2,
            created_renderpasses: Mutex::new(Vec::new()),
        }
    }

    pub fn with_unified_queues() -> Self {
        Self {
            graphics_family: 0,
            compute_family: 0,
            transfer_family: 0,
            created_renderpasses: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Renderer for MockRenderer {
    fn create_renderpass(&self, config: &RenderpassConfig) -> Result<Arc<dyn Renderpass>> {
        // Same contract checks as the real backend
        let mut produced_inputs: Vec<u32> = Vec::new();
        for (index, subpass) in config.subpasses.iter().enumerate() {
            for attachment in subpass
                .color_attachments
                .iter()
                .chain(subpass.depth_attachment.iter())
            {
                if attachment.attachment_ref as usize >= MAX_SUBPASS_ATTACHMENTS {
                    return Err(Error::InvalidResource(format!(
                        "attachment slot {} out of range (max {})",
                        attachment.attachment_ref, MAX_SUBPASS_ATTACHMENTS
                    )));
                }
                if attachment.usage.contains(AttachmentUsage::SUBPASS_INPUT) {
                    produced_inputs.push(attachment.attachment_ref);
                }
            }
            for input_ref in &subpass.input_attachment_refs {
                if index == 0 {
                    return Err(Error::InvalidResource(
                        "cannot read an input attachment in subpass 0".to_string(),
                    ));
                }
                if !produced_inputs.contains(input_ref) {
                    return Err(Error::InvalidResource(format!(
                        "input attachment slot {} was never produced",
                        input_ref
                    )));
                }
            }
        }

        let subpass_count =
            config.subpasses.len() as u32 + (config.swapchain_target && config.subpasses.is_empty()) as u32;
        self.created_renderpasses
            .lock()
            .unwrap()
            .push(subpass_count);
        Ok(Arc::new(MockRenderpass {
            subpass_count,
            attachment_count: 0,
            clear_color: Mutex::new(config.clear_color),
            resized_to: Mutex::new(None),
        }))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        Ok(Arc::new(MockShader {
            stage: desc.stage,
            reflection: PipelineReflection::empty(),
        }))
    }

    fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
    ) -> Result<Arc<dyn GraphicsPipeline>> {
        let mut reflection = config.vertex_shader.reflection().clone();
        reflection.merge(config.fragment_shader.reflection());
        Ok(Arc::new(MockGraphicsPipeline {
            reflection,
            subpass: config.subpass,
        }))
    }

    fn create_compute_pipeline(&self, shader: &Arc<dyn Shader>) -> Result<Arc<dyn ComputePipeline>> {
        Ok(Arc::new(MockComputePipeline {
            reflection: shader.reflection().clone(),
        }))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture2D>> {
        Ok(Arc::new(MockTexture {
            width: desc.width,
            height: desc.height,
            format: desc.format,
        }))
    }

    fn create_vertex_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn VertexBuffer>> {
        Ok(Arc::new(MockVertexBuffer {
            vertex_count: desc.element_count,
        }))
    }

    fn create_index_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn IndexBuffer>> {
        Ok(Arc::new(MockIndexBuffer {
            index_count: desc.element_count,
        }))
    }

    fn create_storage_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn StorageBuffer>> {
        Ok(Arc::new(MockStorageBuffer { size: desc.size }))
    }

    fn create_cmd_buffer(&self) -> Result<Box<dyn CmdBuffer>> {
        Ok(Box::new(MockCmdBuffer::new(
            self.graphics_family,
            self.compute_family,
        )))
    }

    fn has_dedicated_compute_queue(&self) -> bool {
        self.compute_family != self.graphics_family
    }

    fn has_dedicated_transfer_queue(&self) -> bool {
        self.transfer_family != self.graphics_family && self.transfer_family != self.compute_family
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn on_resized(&self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "mock_renderer_tests.rs"]
mod tests;
