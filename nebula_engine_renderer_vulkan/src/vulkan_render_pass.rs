/// Renderpass - derives attachments, subpass dependencies and clear values
/// from a declarative config
///
/// The derivation itself lives in `RenderpassPlan`, which is pure over POD
/// Vulkan types so the dependency rules can be tested without a device. The
/// `Renderpass` wrapper owns the native render pass, the attachment images
/// and the per-swapchain-image framebuffers.

use std::sync::{Arc, Mutex};

use ash::vk;
use nebula_engine::glam::Vec4;
use nebula_engine::nebula::render::{
    AttachmentUsage, ImageFormat, Renderpass as RendererRenderpass, RenderpassConfig, Sampler,
    SubpassDesc, Texture2D, MAX_SUBPASS_ATTACHMENTS,
};
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_err, engine_trace};
use rustc_hash::FxHashMap;

use crate::vulkan::image_format_to_vk;
use crate::vulkan_context::GpuContext;
use crate::vulkan_swapchain::Swapchain;
use crate::vulkan_texture::Texture;

/// Creation parameters of one attachment slot, kept for image (re)creation
#[derive(Clone, Copy)]
pub(crate) struct SlotInfo {
    pub format: ImageFormat,
    pub vk_format: vk::Format,
    pub usage: AttachmentUsage,
    pub sampler: Sampler,
}

/// Per-subpass attachment references
#[derive(Default)]
pub(crate) struct SubpassPlan {
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    pub input_refs: Vec<vk::AttachmentReference>,
}

/// Derived renderpass structure
///
/// Slots are stable indices shared across subpasses; the swapchain target,
/// when requested, takes the slot right after the user-populated ones.
pub(crate) struct RenderpassPlan {
    /// Attachment descriptions, indexed by slot
    attachments: Vec<Option<vk::AttachmentDescription>>,
    /// Reference layout each slot is rendered in, indexed by slot
    ref_layouts: Vec<Option<vk::AttachmentReference>>,
    /// Image creation parameters per slot (none for the injected target)
    slot_info: Vec<Option<SlotInfo>>,
    /// Slots readable as input attachments by later subpasses
    input_refs: FxHashMap<u32, vk::AttachmentReference>,

    subpasses: Vec<SubpassPlan>,
    dependencies: Vec<vk::SubpassDependency>,

    /// Bit per slot that takes the shared clear color
    clear_bits: u32,
    attachment_count: u32,
    swapchain_slot: Option<u32>,
    framebuffer_layers: u32,

    first_renderpass: bool,
    swapchain_target: bool,
}

impl RenderpassPlan {
    pub fn new(first_renderpass: bool, swapchain_target: bool) -> Self {
        Self {
            attachments: vec![None; MAX_SUBPASS_ATTACHMENTS + 1],
            ref_layouts: vec![None; MAX_SUBPASS_ATTACHMENTS + 1],
            slot_info: vec![None; MAX_SUBPASS_ATTACHMENTS + 1],
            input_refs: FxHashMap::default(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            clear_bits: 0,
            attachment_count: 0,
            swapchain_slot: None,
            framebuffer_layers: 1,
            first_renderpass,
            swapchain_target,
        }
    }

    /// Record one subpass: its attachments, its input references and its
    /// dependency on the previous subpass (or EXTERNAL for the first)
    ///
    /// `depth_format` is the device-resolved depth format for this subpass's
    /// depth attachment, if any.
    pub fn add_subpass(&mut self, desc: &SubpassDesc, depth_format: vk::Format) -> Result<()> {
        let index = self.subpasses.len() as u32;
        let mut subpass = SubpassPlan::default();

        for attachment in &desc.color_attachments {
            let slot = attachment.attachment_ref;
            if slot as usize >= MAX_SUBPASS_ATTACHMENTS {
                return Err(Error::InvalidResource(format!(
                    "Attachment slot {} exceeds capacity {}",
                    slot, MAX_SUBPASS_ATTACHMENTS
                )));
            }

            let final_layout = if attachment.usage.contains(AttachmentUsage::RENDERPASS_INPUT) {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            };

            match &mut self.attachments[slot as usize] {
                Some(existing) => {
                    // A re-declaration in a later subpass can promote the
                    // slot to a sampled output
                    if attachment.usage.contains(AttachmentUsage::RENDERPASS_INPUT) {
                        existing.final_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
                    }
                    if let Some(info) = &mut self.slot_info[slot as usize] {
                        info.usage |= attachment.usage;
                    }
                }
                None => {
                    // ImageFormat::None resolves to the swapchain format later
                    let vk_format = image_format_to_vk(attachment.format, vk::Format::UNDEFINED);
                    self.attachments[slot as usize] = Some(vk::AttachmentDescription {
                        format: vk_format,
                        samples: vk::SampleCountFlags::TYPE_1,
                        load_op: vk::AttachmentLoadOp::CLEAR,
                        store_op: vk::AttachmentStoreOp::STORE,
                        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                        initial_layout: vk::ImageLayout::UNDEFINED,
                        final_layout,
                        ..Default::default()
                    });
                    self.slot_info[slot as usize] = Some(SlotInfo {
                        format: attachment.format,
                        vk_format,
                        usage: attachment.usage,
                        sampler: attachment.sampler,
                    });
                }
            }

            let reference = vk::AttachmentReference {
                attachment: slot,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            };
            subpass.color_refs.push(reference);
            self.ref_layouts[slot as usize] = Some(reference);

            if attachment.usage.contains(AttachmentUsage::SUBPASS_INPUT) {
                self.input_refs.insert(
                    slot,
                    vk::AttachmentReference {
                        attachment: slot,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                );
            }
        }

        if let Some(attachment) = &desc.depth_attachment {
            let slot = attachment.attachment_ref;
            if slot as usize >= MAX_SUBPASS_ATTACHMENTS {
                return Err(Error::InvalidResource(format!(
                    "Attachment slot {} exceeds capacity {}",
                    slot, MAX_SUBPASS_ATTACHMENTS
                )));
            }

            let final_layout = if attachment.usage.contains(AttachmentUsage::RENDERPASS_INPUT) {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            };

            match &mut self.attachments[slot as usize] {
                Some(existing) => {
                    if attachment.usage.contains(AttachmentUsage::RENDERPASS_INPUT) {
                        existing.final_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
                    }
                    if let Some(info) = &mut self.slot_info[slot as usize] {
                        info.usage |= attachment.usage;
                    }
                }
                None => {
                    self.attachments[slot as usize] = Some(vk::AttachmentDescription {
                        format: depth_format,
                        samples: vk::SampleCountFlags::TYPE_1,
                        load_op: vk::AttachmentLoadOp::CLEAR,
                        store_op: vk::AttachmentStoreOp::DONT_CARE,
                        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                        initial_layout: vk::ImageLayout::UNDEFINED,
                        final_layout,
                        ..Default::default()
                    });
                    self.slot_info[slot as usize] = Some(SlotInfo {
                        format: attachment.format,
                        vk_format: depth_format,
                        usage: attachment.usage,
                        sampler: attachment.sampler,
                    });
                }
            }

            let reference = vk::AttachmentReference {
                attachment: slot,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            };
            subpass.depth_ref = Some(reference);
            self.ref_layouts[slot as usize] = Some(reference);

            if attachment.usage.contains(AttachmentUsage::SUBPASS_INPUT) {
                self.input_refs.insert(
                    slot,
                    vk::AttachmentReference {
                        attachment: slot,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                );
            }
        }

        for &slot in &desc.input_attachment_refs {
            if index == 0 {
                return Err(Error::InvalidResource(
                    "Subpass 0 cannot read input attachments".to_string(),
                ));
            }
            let reference = self.input_refs.get(&slot).ok_or_else(|| {
                Error::InvalidResource(format!(
                    "Input attachment slot {} was not produced with SUBPASS_INPUT usage",
                    slot
                ))
            })?;
            subpass.input_refs.push(*reference);
        }

        self.push_subpass_dependency(index, desc)?;
        self.subpasses.push(subpass);
        Ok(())
    }

    /// Dependency of subpass `index` on its predecessor (EXTERNAL for the
    /// first subpass), BY_REGION
    fn push_subpass_dependency(&mut self, index: u32, desc: &SubpassDesc) -> Result<()> {
        let mut dependency = vk::SubpassDependency {
            src_subpass: if index == 0 {
                vk::SUBPASS_EXTERNAL
            } else {
                index - 1
            },
            dst_subpass: index,
            dependency_flags: vk::DependencyFlags::BY_REGION,
            ..Default::default()
        };

        if !desc.color_attachments.is_empty() {
            dependency.src_stage_mask |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            dependency.src_access_mask |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
            dependency.dst_stage_mask |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            dependency.dst_access_mask |=
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }

        if desc.depth_attachment.is_some() {
            dependency.src_stage_mask |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            dependency.src_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
            dependency.dst_stage_mask |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            dependency.dst_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }

        for &slot in &desc.input_attachment_refs {
            let producer = self.ref_layouts[slot as usize].ok_or_else(|| {
                Error::InvalidResource(format!("Input attachment slot {} was never written", slot))
            })?;
            if producer.layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
                dependency.src_stage_mask |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
                dependency.src_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
            } else {
                dependency.src_stage_mask |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
                dependency.src_access_mask |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
            }
            dependency.dst_stage_mask |= vk::PipelineStageFlags::FRAGMENT_SHADER;
            dependency.dst_access_mask |= vk::AccessFlags::INPUT_ATTACHMENT_READ;
        }

        self.dependencies.push(dependency);
        Ok(())
    }

    /// Resolve deferred formats, inject the swapchain target and close the
    /// plan with the external tail dependency. Returns the clear values.
    pub fn finalize(
        &mut self,
        swapchain_format: vk::Format,
        clear_color: [f32; 4],
    ) -> Result<Vec<vk::ClearValue>> {
        let mut clear_values = Vec::new();

        // Slots are contiguous from 0; the first gap ends the walk
        for slot in 0..=MAX_SUBPASS_ATTACHMENTS {
            let Some(reference) = self.ref_layouts[slot] else {
                break;
            };
            if reference.layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL {
                self.clear_bits |= 1 << slot;
                clear_values.push(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear_color,
                    },
                });
            } else {
                clear_values.push(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                });
            }
        }

        for attachment in self.attachments.iter_mut().flatten() {
            if attachment.format == vk::Format::UNDEFINED {
                attachment.format = swapchain_format;
            }
        }
        for info in self.slot_info.iter_mut().flatten() {
            if info.vk_format == vk::Format::UNDEFINED {
                info.vk_format = swapchain_format;
            }
        }

        if self.swapchain_target {
            self.inject_swapchain_target(swapchain_format, clear_color, &mut clear_values)?;
        }

        if self.subpasses.is_empty() {
            return Err(Error::InvalidResource(
                "Renderpass has no subpasses".to_string(),
            ));
        }

        self.push_external_dependency();
        self.attachment_count = clear_values.len() as u32;
        Ok(clear_values)
    }

    /// Append a presentable color target; a new subpass when none exists,
    /// otherwise an extra reference on the last subpass
    fn inject_swapchain_target(
        &mut self,
        swapchain_format: vk::Format,
        clear_color: [f32; 4],
        clear_values: &mut Vec<vk::ClearValue>,
    ) -> Result<()> {
        let slot = clear_values.len() as u32;
        if slot as usize >= self.attachments.len() {
            return Err(Error::InvalidResource(
                "No attachment slot left for the swapchain target".to_string(),
            ));
        }

        self.attachments[slot as usize] = Some(vk::AttachmentDescription {
            format: swapchain_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        });

        let reference = vk::AttachmentReference {
            attachment: slot,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        self.clear_bits |= 1 << slot;
        clear_values.push(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        });
        self.swapchain_slot = Some(slot);

        let dst_subpass = if self.subpasses.is_empty() {
            self.subpasses.push(SubpassPlan {
                color_refs: vec![reference],
                ..Default::default()
            });
            0
        } else {
            let last = self.subpasses.len() - 1;
            self.subpasses[last].color_refs.push(reference);
            last as u32
        };

        self.dependencies.push(vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::COLOR_ATTACHMENT_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        });

        Ok(())
    }

    /// Tail dependency protecting consumers of this renderpass's outputs
    fn push_external_dependency(&mut self) {
        let last_index = (self.subpasses.len() - 1) as u32;
        let last = &self.subpasses[last_index as usize];

        let mut dependency = vk::SubpassDependency {
            src_subpass: last_index,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            dependency_flags: vk::DependencyFlags::BY_REGION,
            ..Default::default()
        };

        if !last.color_refs.is_empty() {
            dependency.src_stage_mask |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            dependency.src_access_mask |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
            dependency.dst_stage_mask |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            dependency.dst_access_mask |=
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }
        if last.depth_ref.is_some() {
            dependency.src_stage_mask |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            dependency.src_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
            dependency.dst_stage_mask |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            dependency.dst_access_mask |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }

        // Later renderpasses of the frame enter behind fragment-shader reads
        // of the previous one, not behind raw attachment output
        if !self.first_renderpass {
            dependency.src_stage_mask = vk::PipelineStageFlags::FRAGMENT_SHADER;
            dependency.src_access_mask = vk::AccessFlags::SHADER_READ;
        }

        // Outputs that end in SHADER_READ_ONLY will be sampled next
        let sampled_later = self.attachments.iter().flatten().any(|a| {
            a.final_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        });
        if sampled_later {
            dependency.dst_stage_mask = vk::PipelineStageFlags::FRAGMENT_SHADER;
            dependency.dst_access_mask = vk::AccessFlags::SHADER_READ;
        }

        self.dependencies.push(dependency);
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    pub fn attachment_count(&self) -> u32 {
        self.attachment_count
    }

    pub fn clear_bits(&self) -> u32 {
        self.clear_bits
    }

    pub fn swapchain_slot(&self) -> Option<u32> {
        self.swapchain_slot
    }

    /// Layer count for framebuffer creation, never zero
    pub fn set_framebuffer_layers(&mut self, layers: u32) {
        self.framebuffer_layers = layers.max(1);
    }

    pub fn framebuffer_layers(&self) -> u32 {
        self.framebuffer_layers
    }

    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }

    pub fn subpasses(&self) -> &[SubpassPlan] {
        &self.subpasses
    }

    pub fn slot_info(&self, slot: u32) -> Option<&SlotInfo> {
        self.slot_info.get(slot as usize).and_then(|s| s.as_ref())
    }

    fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        self.attachments
            .iter()
            .take(self.attachment_count as usize)
            .flatten()
            .copied()
            .collect()
    }
}

/// Size-dependent renderpass state, rebuilt on resize
struct RenderpassState {
    clear_values: Vec<vk::ClearValue>,
    framebuffers: Vec<vk::Framebuffer>,
    images: Vec<Option<Arc<Texture>>>,
    extent: vk::Extent2D,
}

/// Vulkan renderpass with owned attachment images and framebuffers
pub struct Renderpass {
    context: Arc<GpuContext>,
    swapchain: Arc<Mutex<Swapchain>>,
    render_pass: vk::RenderPass,
    plan: RenderpassPlan,
    state: Mutex<RenderpassState>,
}

impl Renderpass {
    pub(crate) fn new(
        context: Arc<GpuContext>,
        swapchain: Arc<Mutex<Swapchain>>,
        config: &RenderpassConfig,
    ) -> Result<Self> {
        let mut plan = RenderpassPlan::new(config.first_renderpass, config.swapchain_target);
        plan.set_framebuffer_layers(config.framebuffer.layers);

        for subpass in &config.subpasses {
            let depth_format = match &subpass.depth_attachment {
                Some(attachment) => {
                    let requested =
                        image_format_to_vk(attachment.format, vk::Format::D32_SFLOAT);
                    context.find_depth_format(requested)?
                }
                None => vk::Format::UNDEFINED,
            };
            plan.add_subpass(subpass, depth_format)?;
        }

        let (swapchain_format, swapchain_extent, image_count) = {
            let guard = swapchain.lock().unwrap();
            (guard.format(), guard.extent(), guard.image_count())
        };

        let clear_color = config.clear_color.to_array();
        let clear_values = plan.finalize(swapchain_format, clear_color)?;

        let render_pass = create_vk_render_pass(&context, &plan)?;

        let extent = if config.framebuffer.width > 0 && config.framebuffer.height > 0 {
            vk::Extent2D {
                width: config.framebuffer.width,
                height: config.framebuffer.height,
            }
        } else {
            swapchain_extent
        };

        let images = create_attachment_images(&context, &plan, extent)?;

        let mut renderpass = Self {
            context,
            swapchain,
            render_pass,
            plan,
            state: Mutex::new(RenderpassState {
                clear_values,
                framebuffers: Vec::new(),
                images,
                extent,
            }),
        };
        renderpass.recreate_framebuffers(image_count)?;

        engine_trace!(
            "nebula::vulkan",
            "Renderpass created: {} subpasses, {} attachments, {} dependencies",
            renderpass.plan.subpass_count(),
            renderpass.plan.attachment_count(),
            renderpass.plan.dependencies().len()
        );

        Ok(renderpass)
    }

    pub(crate) fn vk_render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.state.lock().unwrap().extent
    }

    pub(crate) fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.state.lock().unwrap().clear_values.clone()
    }

    pub(crate) fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        let state = self.state.lock().unwrap();
        state
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                Error::InvalidResource(format!(
                    "No framebuffer for swapchain image {}",
                    image_index
                ))
            })
    }

    /// Attachment image at `slot`, for input-attachment and sampled bindings
    pub(crate) fn attachment_image(&self, slot: u32) -> Result<Arc<Texture>> {
        self.state
            .lock()
            .unwrap()
            .images
            .get(slot as usize)
            .and_then(|i| i.clone())
            .ok_or_else(|| {
                Error::InvalidResource(format!("Renderpass owns no image at slot {}", slot))
            })
    }

    /// Number of color attachments in `subpass`, for pipeline blend state
    pub(crate) fn color_attachment_count(&self, subpass: u32) -> Result<usize> {
        self.plan
            .subpasses()
            .get(subpass as usize)
            .map(|sp| sp.color_refs.len())
            .ok_or_else(|| {
                Error::InvalidResource(format!("Renderpass has no subpass {}", subpass))
            })
    }

    pub(crate) fn has_depth(&self, subpass: u32) -> bool {
        self.plan
            .subpasses()
            .get(subpass as usize)
            .map(|sp| sp.depth_ref.is_some())
            .unwrap_or(false)
    }

    fn recreate_framebuffers(&mut self, image_count: usize) -> Result<()> {
        let state = self.state.get_mut().unwrap();
        let swapchain = self.swapchain.lock().unwrap();

        for &framebuffer in &state.framebuffers {
            unsafe {
                self.context.device.destroy_framebuffer(framebuffer, None);
            }
        }
        state.framebuffers.clear();

        for image_index in 0..image_count {
            let mut views = Vec::with_capacity(self.plan.attachment_count() as usize);
            for slot in 0..self.plan.attachment_count() {
                if Some(slot) == self.plan.swapchain_slot() {
                    views.push(swapchain.image_view(image_index as u32));
                } else {
                    let image = state.images[slot as usize].as_ref().ok_or_else(|| {
                        Error::InvalidResource(format!("Attachment slot {} has no image", slot))
                    })?;
                    views.push(image.view());
                }
            }

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&views)
                .width(state.extent.width)
                .height(state.extent.height)
                .layers(self.plan.framebuffer_layers());
            let framebuffer = unsafe {
                self.context
                    .device
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| {
                        engine_err!("nebula::vulkan", "Failed to create framebuffer: {:?}", e)
                    })?
            };
            state.framebuffers.push(framebuffer);
        }

        Ok(())
    }
}

impl RendererRenderpass for Renderpass {
    fn set_clear_color(&self, color: Vec4) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let clear_bits = self.plan.clear_bits();
        for (slot, value) in state.clear_values.iter_mut().enumerate() {
            if clear_bits & (1 << slot) != 0 {
                *value = vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: color.to_array(),
                    },
                };
            }
        }
        Ok(())
    }

    fn on_resized(&self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.context.device.device_wait_idle().map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to wait idle before renderpass resize: {:?}", e)
            })?;
        }

        let image_count = {
            let mut state = self.state.lock().unwrap();

            for &framebuffer in &state.framebuffers {
                unsafe {
                    self.context.device.destroy_framebuffer(framebuffer, None);
                }
            }
            state.framebuffers.clear();

            for image in state.images.iter().flatten() {
                image.resize(width, height)?;
            }
            state.extent = vk::Extent2D { width, height };

            let swapchain = self.swapchain.lock().unwrap();
            swapchain.image_count()
        };

        // Rebuild framebuffers against the resized views
        let swapchain = self.swapchain.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        for image_index in 0..image_count {
            let mut views = Vec::with_capacity(self.plan.attachment_count() as usize);
            for slot in 0..self.plan.attachment_count() {
                if Some(slot) == self.plan.swapchain_slot() {
                    views.push(swapchain.image_view(image_index as u32));
                } else {
                    let image = state.images[slot as usize].as_ref().ok_or_else(|| {
                        Error::InvalidResource(format!("Attachment slot {} has no image", slot))
                    })?;
                    views.push(image.view());
                }
            }

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&views)
                .width(width)
                .height(height)
                .layers(self.plan.framebuffer_layers());
            let framebuffer = unsafe {
                self.context
                    .device
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| {
                        engine_err!("nebula::vulkan", "Failed to recreate framebuffer: {:?}", e)
                    })?
            };
            state.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn subpass_count(&self) -> u32 {
        self.plan.subpass_count()
    }

    fn attachment_count(&self) -> u32 {
        self.plan.attachment_count()
    }
}

impl Drop for Renderpass {
    fn drop(&mut self) {
        unsafe {
            self.context.device.device_wait_idle().ok();
            if let Ok(state) = self.state.lock() {
                for &framebuffer in &state.framebuffers {
                    self.context.device.destroy_framebuffer(framebuffer, None);
                }
            }
            self.context.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn create_vk_render_pass(context: &Arc<GpuContext>, plan: &RenderpassPlan) -> Result<vk::RenderPass> {
    let attachments = plan.attachment_descriptions();

    let subpass_descriptions: Vec<vk::SubpassDescription> = plan
        .subpasses()
        .iter()
        .map(|sp| {
            let mut description = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&sp.color_refs)
                .input_attachments(&sp.input_refs);
            if let Some(depth_ref) = &sp.depth_ref {
                description = description.depth_stencil_attachment(depth_ref);
            }
            description
        })
        .collect();

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpass_descriptions)
        .dependencies(plan.dependencies());

    unsafe {
        context
            .device
            .create_render_pass(&create_info, None)
            .map_err(|e| engine_err!("nebula::vulkan", "Failed to create render pass: {:?}", e))
    }
}

fn create_attachment_images(
    context: &Arc<GpuContext>,
    plan: &RenderpassPlan,
    extent: vk::Extent2D,
) -> Result<Vec<Option<Arc<Texture>>>> {
    let mut images = Vec::with_capacity(plan.attachment_count() as usize);
    for slot in 0..plan.attachment_count() {
        if Some(slot) == plan.swapchain_slot() {
            images.push(None);
            continue;
        }
        let info = plan.slot_info(slot).ok_or_else(|| {
            Error::InvalidResource(format!("Attachment slot {} has no creation info", slot))
        })?;
        let texture = Texture::new_attachment(
            context.clone(),
            info.format,
            info.vk_format,
            extent.width,
            extent.height,
            info.usage,
            &info.sampler,
        )?;
        images.push(Some(Arc::new(texture)));
    }
    Ok(images)
}

#[cfg(test)]
#[path = "vulkan_render_pass_tests.rs"]
mod tests;
