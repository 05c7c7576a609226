/// Renderpass configuration types and trait
///
/// A renderpass is described declaratively (subpasses + attachments) and the
/// backend derives attachment descriptions, subpass dependencies and clear
/// values from it.

use glam::Vec4;

use crate::error::Result;
use crate::renderer::texture::{AttachmentUsage, ImageFormat, Sampler};

/// Maximum number of attachment slots a renderpass can address
pub const MAX_SUBPASS_ATTACHMENTS: usize = 5;

/// One attachment of a subpass, addressed by a stable slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassAttachment {
    /// Attachment slot (`0..MAX_SUBPASS_ATTACHMENTS`), shared across subpasses
    pub attachment_ref: u32,
    pub format: ImageFormat,
    pub usage: AttachmentUsage,
    pub sampler: Sampler,
}

impl SubpassAttachment {
    pub fn color(attachment_ref: u32, format: ImageFormat) -> Self {
        Self {
            attachment_ref,
            format,
            usage: AttachmentUsage::COLOR_ATTACHMENT,
            sampler: Sampler::default(),
        }
    }

    pub fn depth(attachment_ref: u32, format: ImageFormat) -> Self {
        Self {
            attachment_ref,
            format,
            usage: AttachmentUsage::DEPTH_ATTACHMENT,
            sampler: Sampler::default(),
        }
    }

    pub fn with_usage(mut self, usage: AttachmentUsage) -> Self {
        self.usage |= usage;
        self
    }
}

/// One subpass of a renderpass
#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    pub color_attachments: Vec<SubpassAttachment>,
    pub depth_attachment: Option<SubpassAttachment>,
    /// Attachment slots read as input attachments, in shader binding order.
    /// Each slot must have been produced by an earlier subpass with
    /// `SUBPASS_INPUT` usage.
    pub input_attachment_refs: Vec<u32>,
}

/// Framebuffer dimensions for a renderpass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u32,
}

impl Default for FramebufferInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            layers: 1,
            samples: 1,
        }
    }
}

/// Declarative renderpass description
#[derive(Debug, Clone)]
pub struct RenderpassConfig {
    pub subpasses: Vec<SubpassDesc>,
    /// Clear color applied to every color attachment
    pub clear_color: Vec4,
    pub framebuffer: FramebufferInfo,
    /// First renderpass of the frame: the external dependency synchronizes
    /// against previous-frame color output instead of fragment-shader reads
    pub first_renderpass: bool,
    /// Append a swapchain-format color target presented by the overlay pass
    pub swapchain_target: bool,
}

impl Default for RenderpassConfig {
    fn default() -> Self {
        Self {
            subpasses: Vec::new(),
            clear_color: Vec4::new(0.025, 0.025, 0.025, 1.0),
            framebuffer: FramebufferInfo::default(),
            first_renderpass: false,
            swapchain_target: false,
        }
    }
}

/// Renderpass resource trait
///
/// Created from a `RenderpassConfig` by `Renderer::create_renderpass`.
pub trait Renderpass: Send + Sync {
    /// Rewrite the clear color of every color attachment
    fn set_clear_color(&self, color: Vec4) -> Result<()>;

    /// Recreate size-dependent state (owned images + framebuffers)
    fn on_resized(&self, width: u32, height: u32) -> Result<()>;

    /// Number of subpasses after backend injection
    fn subpass_count(&self) -> u32;

    /// Number of attachments after backend injection
    fn attachment_count(&self) -> u32;
}
