/// Texture and attachment types shared by all backends

use bitflags::bitflags;

use crate::error::Result;

/// Pixel formats supported for attachments and textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Resolved by the backend (e.g. swapchain format for injected targets)
    None,

    R8Uint,
    Rgb8,
    Rgba8,
    Rgba32Float,

    Depth32Float,
    Depth32FloatStencil8,
    Depth24Stencil8,
}

impl ImageFormat {
    /// True for the depth/stencil family of formats
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            ImageFormat::Depth32Float
                | ImageFormat::Depth32FloatStencil8
                | ImageFormat::Depth24Stencil8
        )
    }
}

bitflags! {
    /// How an attachment is consumed beyond being rendered to
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttachmentUsage: u8 {
        /// Written as a color attachment
        const COLOR_ATTACHMENT = 1 << 0;
        /// Written as the depth attachment
        const DEPTH_ATTACHMENT = 1 << 1;
        /// Read as an input attachment by a later subpass of the same renderpass
        const SUBPASS_INPUT = 1 << 2;
        /// Sampled by a later renderpass (forces a shader-read final layout)
        const RENDERPASS_INPUT = 1 << 3;
    }
}

/// Sampler description for attachment images and textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sampler {
    pub filter: SamplerFilter,
    pub address_mode: SamplerAddressMode,
    pub border_color: SamplerBorderColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerBorderColor {
    TransparentInt,
    #[default]
    BlackInt,
    WhiteInt,
}

/// 2D texture resource trait
///
/// Backends wrap the native image + view + sampler behind this trait.
pub trait Texture2D: Send + Sync {
    /// Upload raw pixel data (tightly packed, full extent)
    fn set_data(&self, data: &[u8]) -> Result<()>;

    /// Recreate the underlying image at a new size
    fn resize(&self, new_width: u32, new_height: u32) -> Result<()>;

    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> ImageFormat;
    fn mip_level_count(&self) -> u8;
}

/// Descriptor for creating a texture
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub sampler: Sampler,
    /// Generate a full mip chain on upload
    pub mipmapped: bool,
}
