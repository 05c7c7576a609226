/// CmdBuffer trait - per-frame command recording and multi-queue submission
///
/// One CmdBuffer drives the whole frame: graphics recording, the optional
/// transfer and compute lanes, queue ownership transfers between them, and
/// presentation. Backends keep one set of native command buffers and sync
/// objects per frame in flight.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::Result;
use crate::renderer::buffer::{IndexBuffer, StorageBuffer, VertexBuffer};
use crate::renderer::pipeline::{ComputePipeline, GraphicsPipeline};

/// Number of frames recorded ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

bitflags! {
    /// Pipeline stages used for cross-queue waits and barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const LATE_FRAGMENT_TESTS = 1 << 5;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 6;
        const COMPUTE_SHADER = 1 << 7;
        const TRANSFER = 1 << 8;
        const BOTTOM_OF_PIPE = 1 << 9;
    }
}

bitflags! {
    /// Memory access kinds used for queue ownership transfers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const COLOR_ATTACHMENT_READ = 1 << 2;
        const COLOR_ATTACHMENT_WRITE = 1 << 3;
        const TRANSFER_READ = 1 << 4;
        const TRANSFER_WRITE = 1 << 5;
        const VERTEX_ATTRIBUTE_READ = 1 << 6;
        const INDEX_READ = 1 << 7;
    }
}

/// Viewport dimensions and depth range
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Frame command buffer trait
pub trait CmdBuffer: Send + Sync {
    /// Start the frame: wait + reset the frame fence, acquire the swapchain
    /// image, reset and begin the graphics command buffer
    fn begin(&mut self) -> Result<()>;

    /// Finish recording the graphics command buffer
    fn end(&mut self) -> Result<()>;

    /// Submit the frame: scene batch + overlay batch in one submission,
    /// fenced on this frame's in-flight fence
    fn submit(&mut self) -> Result<()>;

    /// Present the acquired image and advance to the next frame in flight
    fn queue_present(&mut self) -> Result<()>;

    // ----- graphics recording -----

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Begin the pipeline's renderpass (clear values come from the renderpass)
    fn begin_render_pass(
        &mut self,
        pipe: &Arc<dyn GraphicsPipeline>,
        push_constants: Option<&[u8]>,
    ) -> Result<()>;

    /// Advance to the next subpass and bind its pipeline
    fn next_subpass(
        &mut self,
        pipe: &Arc<dyn GraphicsPipeline>,
        push_constants: Option<&[u8]>,
    ) -> Result<()>;

    fn end_render_pass(&mut self) -> Result<()>;

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()>;

    fn draw_buffer(&mut self, vertex_buffer: &Arc<dyn VertexBuffer>) -> Result<()>;

    fn draw_indexed(
        &mut self,
        vertex_buffer: &Arc<dyn VertexBuffer>,
        index_buffer: &Arc<dyn IndexBuffer>,
        index_count: u32,
    ) -> Result<()>;

    // ----- transfer lane -----

    /// Begin recording on the transfer-queue command buffer
    fn begin_transfer(&mut self) -> Result<()>;

    /// Submit the transfer buffer; the graphics submission of this frame will
    /// wait on the transfer semaphore at `graphics_wait_stage`
    fn submit_transfer(&mut self, graphics_wait_stage: PipelineStages) -> Result<()>;

    // ----- compute lane -----

    /// Begin recording on the compute-queue command buffer, binding the
    /// pipeline, one descriptor set and optional push constants
    fn begin_compute(
        &mut self,
        pipe: &Arc<dyn ComputePipeline>,
        descriptor_set: u32,
        push_constants: Option<&[u8]>,
    ) -> Result<()>;

    /// Submit the compute buffer waiting on the frame's ready semaphore; the
    /// graphics submission waits on compute completion at `graphics_wait_stage`
    fn submit_compute(&mut self, graphics_wait_stage: PipelineStages) -> Result<()>;

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> Result<()>;

    // ----- queue ownership transfers (no-ops when families alias) -----

    /// Acquire `buffer` on the compute queue from the graphics family
    fn acquire_from_graphics_queue(
        &mut self,
        buffer: &Arc<dyn StorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()>;

    /// Release `buffer` from the compute family back to graphics
    fn release_to_graphics_queue(
        &mut self,
        buffer: &Arc<dyn StorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()>;

    /// Acquire `buffer` on the graphics queue from the compute family
    fn acquire_from_compute_queue(
        &mut self,
        buffer: &Arc<dyn StorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()>;

    /// Release `buffer` from the graphics family to compute
    fn release_to_compute_queue(
        &mut self,
        buffer: &Arc<dyn StorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()>;

    // ----- cross-queue wait registration (idempotent) -----

    /// Make the per-frame graphics submissions wait on the transfer
    /// semaphores; only the first call has an effect
    fn sync_with_transfer_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    );

    /// Make the per-frame graphics submissions wait on compute completion and
    /// re-signal compute readiness; only the first call has an effect
    fn sync_with_compute_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    );

    /// Index of the frame currently being recorded (`0..MAX_FRAMES_IN_FLIGHT`)
    fn current_frame(&self) -> u32;
}
