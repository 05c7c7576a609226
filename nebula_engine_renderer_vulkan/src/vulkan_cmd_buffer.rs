/// CmdBuffer - frame recording and multi-queue synchronization
///
/// One CmdBuffer owns three lanes of per-frame native objects:
///
/// * graphics: the scene and overlay command buffers, the acquire/present
///   semaphore chain and the in-flight fences
/// * transfer: a command buffer, completion semaphore and fence per frame
/// * compute: a command buffer, ready/complete semaphore pair and fence per
///   frame
///
/// The graphics submission is one `vkQueueSubmit2` with two batches: the
/// scene batch waits on the registered cross-queue semaphores, the overlay
/// batch chains behind it and gates presentation. Cross-queue waits are
/// registered once through the idempotent `sync_with_*` methods; queue
/// ownership transfers are recorded only when the device has a dedicated
/// compute family.

use std::sync::{Arc, Mutex};

use ash::vk;
use nebula_engine::nebula::render::{
    AccessFlags, CmdBuffer as RendererCmdBuffer, ComputePipeline as RendererComputePipeline,
    GraphicsPipeline as RendererGraphicsPipeline, IndexBuffer as RendererIndexBuffer,
    PipelineStages, StorageBuffer as RendererStorageBuffer, VertexBuffer as RendererVertexBuffer,
    Viewport, MAX_FRAMES_IN_FLIGHT,
};
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_bail, engine_err, engine_error, engine_warn};

use crate::vulkan_buffer::{as_vulkan_index_buffer, as_vulkan_vertex_buffer};
use crate::vulkan_context::GpuContext;
use crate::vulkan_pipeline::{
    as_vulkan_compute_pipeline, as_vulkan_graphics_pipeline, as_vulkan_renderpass,
    as_vulkan_storage_buffer,
};
use crate::vulkan_swapchain::Swapchain;

/// Map engine pipeline stages to synchronization2 stage flags
pub(crate) fn pipeline_stages_to_vk2(stages: PipelineStages) -> vk::PipelineStageFlags2 {
    let mut flags = vk::PipelineStageFlags2::empty();
    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        flags |= vk::PipelineStageFlags2::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::VERTEX_INPUT) {
        flags |= vk::PipelineStageFlags2::VERTEX_INPUT;
    }
    if stages.contains(PipelineStages::VERTEX_SHADER) {
        flags |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        flags |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::EARLY_FRAGMENT_TESTS) {
        flags |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::LATE_FRAGMENT_TESTS) {
        flags |= vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        flags |= vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::COMPUTE_SHADER) {
        flags |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        flags |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        flags |= vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
    }
    flags
}

/// Map engine access kinds to synchronization2 access flags
pub(crate) fn access_flags_to_vk2(access: AccessFlags) -> vk::AccessFlags2 {
    let mut flags = vk::AccessFlags2::empty();
    if access.contains(AccessFlags::SHADER_READ) {
        flags |= vk::AccessFlags2::SHADER_READ;
    }
    if access.contains(AccessFlags::SHADER_WRITE) {
        flags |= vk::AccessFlags2::SHADER_WRITE;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_READ) {
        flags |= vk::AccessFlags2::COLOR_ATTACHMENT_READ;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        flags |= vk::AccessFlags2::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::TRANSFER_READ) {
        flags |= vk::AccessFlags2::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        flags |= vk::AccessFlags2::TRANSFER_WRITE;
    }
    if access.contains(AccessFlags::VERTEX_ATTRIBUTE_READ) {
        flags |= vk::AccessFlags2::VERTEX_ATTRIBUTE_READ;
    }
    if access.contains(AccessFlags::INDEX_READ) {
        flags |= vk::AccessFlags2::INDEX_READ;
    }
    flags
}

/// Plan a buffer queue-ownership barrier between two families
///
/// Returns `None` when the families alias: a transfer between the same
/// family is a validation error, not a no-op barrier.
pub(crate) fn plan_ownership_barrier(
    buffer: vk::Buffer,
    src_family: u32,
    dst_family: u32,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
) -> Option<vk::BufferMemoryBarrier2<'static>> {
    if src_family == dst_family {
        return None;
    }
    Some(
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE),
    )
}

struct GraphicsLane {
    pool: vk::CommandPool,
    buffers: [vk::CommandBuffer; MAX_FRAMES_IN_FLIGHT],
    overlay_buffers: [vk::CommandBuffer; MAX_FRAMES_IN_FLIGHT],

    image_available: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    render_complete: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    overlay_complete: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    in_flight: [vk::Fence; MAX_FRAMES_IN_FLIGHT],

    /// Registered scene-batch waits/signals per frame; the stage vectors are
    /// shared across frames (entry i of each stage vector pairs with entry i
    /// of each frame's semaphore vector)
    wait_semaphores: [Vec<vk::Semaphore>; MAX_FRAMES_IN_FLIGHT],
    signal_semaphores: [Vec<vk::Semaphore>; MAX_FRAMES_IN_FLIGHT],
    wait_stages: Vec<vk::PipelineStageFlags2>,
    signal_stages: Vec<vk::PipelineStageFlags2>,
}

struct TransferLane {
    pool: vk::CommandPool,
    buffers: [vk::CommandBuffer; MAX_FRAMES_IN_FLIGHT],
    complete: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    fences: [vk::Fence; MAX_FRAMES_IN_FLIGHT],
    signal_stage: vk::PipelineStageFlags2,
    synced: bool,
}

struct ComputeLane {
    pool: vk::CommandPool,
    buffers: [vk::CommandBuffer; MAX_FRAMES_IN_FLIGHT],
    ready: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    complete: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    fences: [vk::Fence; MAX_FRAMES_IN_FLIGHT],
    synced: bool,
}

/// Vulkan frame command buffer
pub struct CmdBuffer {
    context: Arc<GpuContext>,
    swapchain: Arc<Mutex<Swapchain>>,

    graphics: GraphicsLane,
    transfer: TransferLane,
    compute: ComputeLane,

    current_frame: usize,
    image_index: u32,

    recording: bool,
    ended: bool,
    in_render_pass: bool,
    transfer_recording: bool,
    compute_recording: bool,

    /// Layout and push-constant stages of the last bound graphics pipeline
    bound_layout: Option<(vk::PipelineLayout, vk::ShaderStageFlags)>,
}

fn create_semaphores(device: &ash::Device) -> Result<[vk::Semaphore; MAX_FRAMES_IN_FLIGHT]> {
    let info = vk::SemaphoreCreateInfo::default();
    let mut semaphores = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        semaphores.push(unsafe {
            device.create_semaphore(&info, None).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to create semaphore: {:?}", e)
            })?
        });
    }
    semaphores
        .try_into()
        .map_err(|_| Error::BackendError("Semaphore array size mismatch".to_string()))
}

fn create_signaled_fences(device: &ash::Device) -> Result<[vk::Fence; MAX_FRAMES_IN_FLIGHT]> {
    let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
    let mut fences = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        fences.push(unsafe {
            device
                .create_fence(&info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create fence: {:?}", e))?
        });
    }
    fences
        .try_into()
        .map_err(|_| Error::BackendError("Fence array size mismatch".to_string()))
}

fn create_pool_and_buffers(
    device: &ash::Device,
    queue_family: u32,
    count: usize,
) -> Result<(vk::CommandPool, Vec<vk::CommandBuffer>)> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_family);
    let pool = unsafe {
        device.create_command_pool(&pool_info, None).map_err(|e| {
            engine_err!("nebula::vulkan", "Failed to create command pool: {:?}", e)
        })?
    };

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);
    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        unsafe { device.destroy_command_pool(pool, None) };
        engine_err!("nebula::vulkan", "Failed to allocate command buffers: {:?}", e)
    })?;

    Ok((pool, buffers))
}

impl CmdBuffer {
    pub(crate) fn new(context: Arc<GpuContext>, swapchain: Arc<Mutex<Swapchain>>) -> Result<Self> {
        let device = &context.device;
        let queues = context.queues;

        let (graphics_pool, mut graphics_buffers) =
            create_pool_and_buffers(device, queues.graphics_family, MAX_FRAMES_IN_FLIGHT * 2)?;
        let overlay_buffers: Vec<vk::CommandBuffer> =
            graphics_buffers.split_off(MAX_FRAMES_IN_FLIGHT);

        let image_available = create_semaphores(device)?;
        let render_complete = create_semaphores(device)?;
        let overlay_complete = create_semaphores(device)?;
        let in_flight = create_signaled_fences(device)?;

        // The scene batch always waits for the acquired image and signals
        // scene completion at color output
        let wait_semaphores =
            std::array::from_fn(|frame| vec![image_available[frame]]);
        let signal_semaphores =
            std::array::from_fn(|frame| vec![render_complete[frame]]);
        let wait_stages = vec![vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT];
        let signal_stages = vec![vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT];

        let graphics = GraphicsLane {
            pool: graphics_pool,
            buffers: graphics_buffers
                .try_into()
                .map_err(|_| Error::BackendError("Command buffer array size mismatch".to_string()))?,
            overlay_buffers: overlay_buffers
                .try_into()
                .map_err(|_| Error::BackendError("Command buffer array size mismatch".to_string()))?,
            image_available,
            render_complete,
            overlay_complete,
            in_flight,
            wait_semaphores,
            signal_semaphores,
            wait_stages,
            signal_stages,
        };

        let (transfer_pool, transfer_buffers) =
            create_pool_and_buffers(device, queues.transfer_family, MAX_FRAMES_IN_FLIGHT)?;
        let transfer = TransferLane {
            pool: transfer_pool,
            buffers: transfer_buffers
                .try_into()
                .map_err(|_| Error::BackendError("Command buffer array size mismatch".to_string()))?,
            complete: create_semaphores(device)?,
            fences: create_signaled_fences(device)?,
            signal_stage: vk::PipelineStageFlags2::ALL_TRANSFER,
            synced: false,
        };

        let (compute_pool, compute_buffers) =
            create_pool_and_buffers(device, queues.compute_family, MAX_FRAMES_IN_FLIGHT)?;
        let compute = ComputeLane {
            pool: compute_pool,
            buffers: compute_buffers
                .try_into()
                .map_err(|_| Error::BackendError("Command buffer array size mismatch".to_string()))?,
            ready: create_semaphores(device)?,
            complete: create_semaphores(device)?,
            fences: create_signaled_fences(device)?,
            synced: false,
        };

        Ok(Self {
            context,
            swapchain,
            graphics,
            transfer,
            compute,
            current_frame: 0,
            image_index: 0,
            recording: false,
            ended: false,
            in_render_pass: false,
            transfer_recording: false,
            compute_recording: false,
            bound_layout: None,
        })
    }

    fn bind_graphics_pipeline(
        &mut self,
        pipe: &Arc<dyn RendererGraphicsPipeline>,
        push_constants: Option<&[u8]>,
    ) {
        let vk_pipe = as_vulkan_graphics_pipeline(pipe);
        let cb = self.graphics.buffers[self.current_frame];
        let device = &self.context.device;

        unsafe {
            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, vk_pipe.pipeline);

            let sets = vk_pipe.descriptor_sets();
            if !sets.is_empty() {
                device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    vk_pipe.layout(),
                    0,
                    sets,
                    &[],
                );
            }

            if let Some(data) = push_constants {
                device.cmd_push_constants(
                    cb,
                    vk_pipe.layout(),
                    vk_pipe.push_constant_stages(),
                    0,
                    data,
                );
            }
        }

        self.bound_layout = Some((vk_pipe.layout(), vk_pipe.push_constant_stages()));
    }

    /// Signal the compute ready semaphores once so the first compute
    /// submission's wait can pass
    fn presignal_compute_ready(&self) {
        let signal_infos: Vec<vk::SemaphoreSubmitInfo> = self
            .compute
            .ready
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);

        unsafe {
            if let Err(e) = self.context.device.queue_submit2(
                self.context.queues.graphics_queue,
                &[submit],
                vk::Fence::null(),
            ) {
                engine_error!(
                    "nebula::vulkan",
                    "Failed to pre-signal compute ready semaphores: {:?}",
                    e
                );
                return;
            }
            if let Err(e) = self
                .context
                .device
                .queue_wait_idle(self.context.queues.graphics_queue)
            {
                engine_error!(
                    "nebula::vulkan",
                    "Failed to flush compute ready pre-signal: {:?}",
                    e
                );
            }
        }
    }

    fn record_ownership_barrier(
        &self,
        cb: vk::CommandBuffer,
        barrier: Option<vk::BufferMemoryBarrier2>,
    ) {
        let Some(barrier) = barrier else {
            return;
        };
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe {
            self.context.device.cmd_pipeline_barrier2(cb, &dependency);
        }
    }
}

impl RendererCmdBuffer for CmdBuffer {
    fn begin(&mut self) -> Result<()> {
        if self.recording {
            engine_bail!("nebula::vulkan", "begin called while already recording");
        }

        let device = &self.context.device;
        let frame = self.current_frame;
        let fence = self.graphics.in_flight[frame];

        unsafe {
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to wait frame fence: {:?}", e))?;
        }

        self.image_index = {
            let mut swapchain = self.swapchain.lock().unwrap();
            let (image_index, suboptimal) =
                swapchain.acquire_next_image(self.graphics.image_available[frame])?;
            if suboptimal {
                engine_warn!(
                    "nebula::vulkan",
                    "Swapchain suboptimal during acquire, scheduling recreation"
                );
                swapchain.schedule_recreate();
            }
            image_index
        };

        // The fence is reset only once an image is in hand; a failed acquire
        // must leave the frame slot signaled or the next begin blocks forever
        unsafe {
            device
                .reset_fences(&[fence])
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to reset frame fence: {:?}", e))?;
        }

        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            let cb = self.graphics.buffers[frame];
            device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to reset command buffer: {:?}", e)
                })?;
            device.begin_command_buffer(cb, &begin_info).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to begin command buffer: {:?}", e)
            })?;

            let overlay = self.graphics.overlay_buffers[frame];
            device
                .reset_command_buffer(overlay, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to reset overlay command buffer: {:?}", e)
                })?;
            device.begin_command_buffer(overlay, &begin_info).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to begin overlay command buffer: {:?}", e)
            })?;
        }

        self.recording = true;
        self.ended = false;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.recording {
            engine_bail!("nebula::vulkan", "end called without begin");
        }
        if self.in_render_pass {
            engine_bail!("nebula::vulkan", "end called inside a render pass");
        }

        let frame = self.current_frame;
        unsafe {
            self.context
                .device
                .end_command_buffer(self.graphics.buffers[frame])
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to end command buffer: {:?}", e)
                })?;
            self.context
                .device
                .end_command_buffer(self.graphics.overlay_buffers[frame])
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to end overlay command buffer: {:?}", e)
                })?;
        }

        self.recording = false;
        self.ended = true;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        if !self.ended {
            engine_bail!("nebula::vulkan", "submit called before end");
        }

        let frame = self.current_frame;

        let scene_waits: Vec<vk::SemaphoreSubmitInfo> = self.graphics.wait_semaphores[frame]
            .iter()
            .zip(&self.graphics.wait_stages)
            .map(|(&semaphore, &stage)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage)
            })
            .collect();
        let scene_signals: Vec<vk::SemaphoreSubmitInfo> = self.graphics.signal_semaphores[frame]
            .iter()
            .zip(&self.graphics.signal_stages)
            .map(|(&semaphore, &stage)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage)
            })
            .collect();
        let scene_buffers = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.graphics.buffers[frame])];

        let overlay_waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.graphics.render_complete[frame])
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let overlay_signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.graphics.overlay_complete[frame])
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let overlay_buffers = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.graphics.overlay_buffers[frame])];

        let submits = [
            vk::SubmitInfo2::default()
                .wait_semaphore_infos(&scene_waits)
                .command_buffer_infos(&scene_buffers)
                .signal_semaphore_infos(&scene_signals),
            vk::SubmitInfo2::default()
                .wait_semaphore_infos(&overlay_waits)
                .command_buffer_infos(&overlay_buffers)
                .signal_semaphore_infos(&overlay_signals),
        ];

        unsafe {
            self.context
                .device
                .queue_submit2(
                    self.context.queues.graphics_queue,
                    &submits,
                    self.graphics.in_flight[frame],
                )
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to submit frame: {:?}", e)
                })?;
        }

        self.ended = false;
        Ok(())
    }

    fn queue_present(&mut self) -> Result<()> {
        let frame = self.current_frame;
        let wait_semaphores = [self.graphics.overlay_complete[frame]];
        let image_indices = [self.image_index];

        let result = {
            let swapchain = self.swapchain.lock().unwrap();
            let swapchains = [swapchain.handle()];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);
            unsafe {
                self.context
                    .swapchain_loader
                    .queue_present(self.context.queues.graphics_queue, &present_info)
            }
        };

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.bound_layout = None;

        match result {
            Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                // A resize event will rebuild the swapchain
                engine_warn!("nebula::vulkan", "Swapchain out of date during present");
                Ok(())
            }
            Err(e) => Err(engine_err!(
                "nebula::vulkan",
                "Failed to present swapchain image: {:?}",
                e
            )),
        }
    }

    // ----- graphics recording -----

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        if !self.recording {
            engine_bail!("nebula::vulkan", "set_viewport called outside recording");
        }

        let cb = self.graphics.buffers[self.current_frame];
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x as i32,
                y: viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width as u32,
                height: viewport.height as u32,
            },
        };
        unsafe {
            self.context.device.cmd_set_viewport(cb, 0, &[vk_viewport]);
            self.context.device.cmd_set_scissor(cb, 0, &[scissor]);
        }
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        pipe: &Arc<dyn RendererGraphicsPipeline>,
        push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if !self.recording {
            engine_bail!("nebula::vulkan", "begin_render_pass called outside recording");
        }
        if self.in_render_pass {
            engine_bail!("nebula::vulkan", "begin_render_pass called inside a render pass");
        }

        let vk_pipe = as_vulkan_graphics_pipeline(pipe);
        let renderpass = as_vulkan_renderpass(&vk_pipe.renderpass);

        let clear_values = renderpass.clear_values();
        let framebuffer = renderpass.framebuffer(self.image_index)?;
        let extent = renderpass.extent();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(renderpass.vk_render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.context.device.cmd_begin_render_pass(
                self.graphics.buffers[self.current_frame],
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.in_render_pass = true;
        self.bind_graphics_pipeline(pipe, push_constants);
        Ok(())
    }

    fn next_subpass(
        &mut self,
        pipe: &Arc<dyn RendererGraphicsPipeline>,
        push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "next_subpass called outside a render pass");
        }

        unsafe {
            self.context.device.cmd_next_subpass(
                self.graphics.buffers[self.current_frame],
                vk::SubpassContents::INLINE,
            );
        }
        self.bind_graphics_pipeline(pipe, push_constants);
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "end_render_pass called outside a render pass");
        }

        unsafe {
            self.context
                .device
                .cmd_end_render_pass(self.graphics.buffers[self.current_frame]);
        }
        self.in_render_pass = false;
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "draw called outside a render pass");
        }
        unsafe {
            self.context.device.cmd_draw(
                self.graphics.buffers[self.current_frame],
                vertex_count,
                1,
                first_vertex,
                0,
            );
        }
        Ok(())
    }

    fn draw_buffer(&mut self, vertex_buffer: &Arc<dyn RendererVertexBuffer>) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "draw_buffer called outside a render pass");
        }

        let vk_buffer = as_vulkan_vertex_buffer(vertex_buffer);
        let cb = self.graphics.buffers[self.current_frame];
        unsafe {
            self.context
                .device
                .cmd_bind_vertex_buffers(cb, 0, &[vk_buffer.inner.buffer], &[0]);
            self.context
                .device
                .cmd_draw(cb, vertex_buffer.vertex_count(), 1, 0, 0);
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        vertex_buffer: &Arc<dyn RendererVertexBuffer>,
        index_buffer: &Arc<dyn RendererIndexBuffer>,
        index_count: u32,
    ) -> Result<()> {
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "draw_indexed called outside a render pass");
        }

        let vk_vertex = as_vulkan_vertex_buffer(vertex_buffer);
        let vk_index = as_vulkan_index_buffer(index_buffer);
        let cb = self.graphics.buffers[self.current_frame];
        unsafe {
            self.context
                .device
                .cmd_bind_vertex_buffers(cb, 0, &[vk_vertex.inner.buffer], &[0]);
            self.context.device.cmd_bind_index_buffer(
                cb,
                vk_index.inner.buffer,
                0,
                vk::IndexType::UINT32,
            );
            self.context.device.cmd_draw_indexed(cb, index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    // ----- transfer lane -----

    fn begin_transfer(&mut self) -> Result<()> {
        if self.transfer_recording {
            engine_bail!("nebula::vulkan", "begin_transfer called while already recording");
        }

        let device = &self.context.device;
        let frame = self.current_frame;
        let fence = self.transfer.fences[frame];

        unsafe {
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to wait transfer fence: {:?}", e)
                })?;
            device.reset_fences(&[fence]).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to reset transfer fence: {:?}", e)
            })?;

            let cb = self.transfer.buffers[frame];
            device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to reset transfer command buffer: {:?}", e)
                })?;
            device
                .begin_command_buffer(cb, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to begin transfer command buffer: {:?}", e)
                })?;
        }

        self.transfer_recording = true;
        Ok(())
    }

    fn submit_transfer(&mut self, graphics_wait_stage: PipelineStages) -> Result<()> {
        if !self.transfer_recording {
            engine_bail!("nebula::vulkan", "submit_transfer called without begin_transfer");
        }

        self.sync_with_transfer_queue(graphics_wait_stage, PipelineStages::TRANSFER);

        let frame = self.current_frame;
        let cb = self.transfer.buffers[frame];
        unsafe {
            self.context.device.end_command_buffer(cb).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to end transfer command buffer: {:?}", e)
            })?;

            let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cb)];
            let signals = [vk::SemaphoreSubmitInfo::default()
                .semaphore(self.transfer.complete[frame])
                .stage_mask(self.transfer.signal_stage)];
            let submit = vk::SubmitInfo2::default()
                .command_buffer_infos(&command_buffers)
                .signal_semaphore_infos(&signals);

            self.context
                .device
                .queue_submit2(
                    self.context.queues.transfer_queue,
                    &[submit],
                    self.transfer.fences[frame],
                )
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to submit transfer work: {:?}", e)
                })?;
        }

        self.transfer_recording = false;
        Ok(())
    }

    // ----- compute lane -----

    fn begin_compute(
        &mut self,
        pipe: &Arc<dyn RendererComputePipeline>,
        descriptor_set: u32,
        push_constants: Option<&[u8]>,
    ) -> Result<()> {
        if self.compute_recording {
            engine_bail!("nebula::vulkan", "begin_compute called while already recording");
        }

        let vk_pipe = as_vulkan_compute_pipeline(pipe);
        let sets = vk_pipe.descriptor_sets();
        if descriptor_set as usize >= sets.len() {
            return Err(Error::InvalidResource(format!(
                "Compute pipeline has no descriptor set {}",
                descriptor_set
            )));
        }

        let device = &self.context.device;
        let frame = self.current_frame;
        let fence = self.compute.fences[frame];

        unsafe {
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to wait compute fence: {:?}", e)
                })?;
            device.reset_fences(&[fence]).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to reset compute fence: {:?}", e)
            })?;

            let cb = self.compute.buffers[frame];
            device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to reset compute command buffer: {:?}", e)
                })?;
            device
                .begin_command_buffer(cb, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to begin compute command buffer: {:?}", e)
                })?;

            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, vk_pipe.pipeline);
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::COMPUTE,
                vk_pipe.layout(),
                descriptor_set,
                &[sets[descriptor_set as usize]],
                &[],
            );
            if let Some(data) = push_constants {
                device.cmd_push_constants(
                    cb,
                    vk_pipe.layout(),
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    data,
                );
            }
        }

        self.compute_recording = true;
        Ok(())
    }

    fn submit_compute(&mut self, graphics_wait_stage: PipelineStages) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::vulkan", "submit_compute called without begin_compute");
        }

        self.sync_with_compute_queue(graphics_wait_stage, PipelineStages::COMPUTE_SHADER);

        let frame = self.current_frame;
        let cb = self.compute.buffers[frame];
        unsafe {
            self.context.device.end_command_buffer(cb).map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to end compute command buffer: {:?}", e)
            })?;

            let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cb)];
            let waits = [vk::SemaphoreSubmitInfo::default()
                .semaphore(self.compute.ready[frame])
                .stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)];
            let signals = [vk::SemaphoreSubmitInfo::default()
                .semaphore(self.compute.complete[frame])
                .stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)];
            let submit = vk::SubmitInfo2::default()
                .wait_semaphore_infos(&waits)
                .command_buffer_infos(&command_buffers)
                .signal_semaphore_infos(&signals);

            self.context
                .device
                .queue_submit2(
                    self.context.queues.compute_queue,
                    &[submit],
                    self.compute.fences[frame],
                )
                .map_err(|e| {
                    engine_err!("nebula::vulkan", "Failed to submit compute work: {:?}", e)
                })?;
        }

        self.compute_recording = false;
        Ok(())
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::vulkan", "dispatch called without begin_compute");
        }
        unsafe {
            self.context.device.cmd_dispatch(
                self.compute.buffers[self.current_frame],
                group_x,
                group_y,
                group_z,
            );
        }
        Ok(())
    }

    // ----- queue ownership transfers -----

    fn acquire_from_graphics_queue(
        &mut self,
        buffer: &Arc<dyn RendererStorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::vulkan", "acquire_from_graphics_queue outside compute recording");
        }

        let barrier = plan_ownership_barrier(
            as_vulkan_storage_buffer(buffer).vk_buffer(),
            self.context.queues.graphics_family,
            self.context.queues.compute_family,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            pipeline_stages_to_vk2(dst_stage),
            vk::AccessFlags2::empty(),
            access_flags_to_vk2(dst_access),
        );
        self.record_ownership_barrier(self.compute.buffers[self.current_frame], barrier);
        Ok(())
    }

    fn release_to_graphics_queue(
        &mut self,
        buffer: &Arc<dyn RendererStorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()> {
        if !self.compute_recording {
            engine_bail!("nebula::vulkan", "release_to_graphics_queue outside compute recording");
        }

        let barrier = plan_ownership_barrier(
            as_vulkan_storage_buffer(buffer).vk_buffer(),
            self.context.queues.compute_family,
            self.context.queues.graphics_family,
            pipeline_stages_to_vk2(src_stage),
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access_flags_to_vk2(src_access),
            vk::AccessFlags2::empty(),
        );
        self.record_ownership_barrier(self.compute.buffers[self.current_frame], barrier);
        Ok(())
    }

    fn acquire_from_compute_queue(
        &mut self,
        buffer: &Arc<dyn RendererStorageBuffer>,
        dst_stage: PipelineStages,
        dst_access: AccessFlags,
    ) -> Result<()> {
        if !self.recording {
            engine_bail!("nebula::vulkan", "acquire_from_compute_queue outside recording");
        }

        let barrier = plan_ownership_barrier(
            as_vulkan_storage_buffer(buffer).vk_buffer(),
            self.context.queues.compute_family,
            self.context.queues.graphics_family,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            pipeline_stages_to_vk2(dst_stage),
            vk::AccessFlags2::empty(),
            access_flags_to_vk2(dst_access),
        );
        self.record_ownership_barrier(self.graphics.buffers[self.current_frame], barrier);
        Ok(())
    }

    fn release_to_compute_queue(
        &mut self,
        buffer: &Arc<dyn RendererStorageBuffer>,
        src_stage: PipelineStages,
        src_access: AccessFlags,
    ) -> Result<()> {
        if !self.recording {
            engine_bail!("nebula::vulkan", "release_to_compute_queue outside recording");
        }

        let barrier = plan_ownership_barrier(
            as_vulkan_storage_buffer(buffer).vk_buffer(),
            self.context.queues.graphics_family,
            self.context.queues.compute_family,
            pipeline_stages_to_vk2(src_stage),
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access_flags_to_vk2(src_access),
            vk::AccessFlags2::empty(),
        );
        self.record_ownership_barrier(self.graphics.buffers[self.current_frame], barrier);
        Ok(())
    }

    // ----- cross-queue wait registration -----

    fn sync_with_transfer_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    ) {
        if self.transfer.synced {
            return;
        }

        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            self.graphics.wait_semaphores[frame].push(self.transfer.complete[frame]);
        }
        self.graphics
            .wait_stages
            .push(pipeline_stages_to_vk2(wait_stage));
        self.transfer.signal_stage = pipeline_stages_to_vk2(signal_stage);
        self.transfer.synced = true;
    }

    fn sync_with_compute_queue(
        &mut self,
        wait_stage: PipelineStages,
        signal_stage: PipelineStages,
    ) {
        if self.compute.synced {
            return;
        }

        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            self.graphics.wait_semaphores[frame].push(self.compute.complete[frame]);
            self.graphics.signal_semaphores[frame].push(self.compute.ready[frame]);
        }
        self.graphics
            .wait_stages
            .push(pipeline_stages_to_vk2(wait_stage));
        self.graphics
            .signal_stages
            .push(pipeline_stages_to_vk2(signal_stage));
        self.compute.synced = true;

        // The first compute submission waits on ready before any graphics
        // submission has signaled it
        self.presignal_compute_ready();
    }

    fn current_frame(&self) -> u32 {
        self.current_frame as u32
    }
}

impl Drop for CmdBuffer {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.device_wait_idle().ok();

            for frame in 0..MAX_FRAMES_IN_FLIGHT {
                device.destroy_semaphore(self.graphics.image_available[frame], None);
                device.destroy_semaphore(self.graphics.render_complete[frame], None);
                device.destroy_semaphore(self.graphics.overlay_complete[frame], None);
                device.destroy_fence(self.graphics.in_flight[frame], None);

                device.destroy_semaphore(self.transfer.complete[frame], None);
                device.destroy_fence(self.transfer.fences[frame], None);

                device.destroy_semaphore(self.compute.ready[frame], None);
                device.destroy_semaphore(self.compute.complete[frame], None);
                device.destroy_fence(self.compute.fences[frame], None);
            }

            device.destroy_command_pool(self.graphics.pool, None);
            device.destroy_command_pool(self.transfer.pool, None);
            device.destroy_command_pool(self.compute.pool, None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_cmd_buffer_tests.rs"]
mod tests;
