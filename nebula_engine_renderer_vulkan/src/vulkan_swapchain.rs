/// Swapchain - presentation surface management
///
/// Owns the window surface and the swapchain images. Recreation requests
/// with a zero-area extent (minimized window) are deferred and replayed on
/// the next acquire instead of blocking.

use std::sync::Arc;

use ash::vk;
use nebula_engine::nebula::{Error, Result};
use nebula_engine::{engine_err, engine_error, engine_trace};

use crate::vulkan_context::GpuContext;

/// Preferred surface format, falling back to whatever the surface offers
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::R8G8B8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0])
}

/// MAILBOX when available, otherwise the always-supported FIFO
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more image than the minimum, clamped to the surface maximum
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Swapchain extent for the requested window size
///
/// When the surface pins the extent (`current_extent.width != u32::MAX`)
/// that wins; otherwise width and height clamp independently to the
/// surface limits.
pub(crate) fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Vulkan swapchain
pub struct Swapchain {
    context: Arc<GpuContext>,

    surface: vk::SurfaceKHR,

    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,

    graphics_family: u32,
    present_family: u32,

    /// Deferred recreation size, set when a resize arrives with zero area
    pending_recreate: Option<(u32, u32)>,
}

impl Swapchain {
    pub fn new(
        context: Arc<GpuContext>,
        surface: vk::SurfaceKHR,
        graphics_family: u32,
        present_family: u32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut swapchain = Self {
            context,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            extent: vk::Extent2D::default(),
            graphics_family,
            present_family,
            pending_recreate: None,
        };
        swapchain.create_swapchain(width, height)?;
        Ok(swapchain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_view(&self, image_index: u32) -> vk::ImageView {
        self.image_views[image_index as usize]
    }

    /// Acquire the next presentable image, signaling `semaphore`
    ///
    /// Replays a deferred recreation first if one is pending. Returns the
    /// image index and whether the swapchain reported itself suboptimal,
    /// so the caller can schedule recreation.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        if let Some((width, height)) = self.pending_recreate.take() {
            self.recreate(width, height)?;
            if self.pending_recreate.is_some() {
                // Still zero-area; nothing to acquire this frame
                return Err(Error::BackendError(
                    "Swapchain has no presentable extent".to_string(),
                ));
            }
        }

        unsafe {
            self.context
                .swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(|e| {
                    if e == vk::Result::ERROR_OUT_OF_DATE_KHR {
                        engine_err!("nebula::vulkan", "Swapchain out of date during acquire")
                    } else {
                        engine_err!("nebula::vulkan", "Failed to acquire swapchain image: {:?}", e)
                    }
                })
        }
    }

    /// Request recreation at the current size before the next acquire
    pub fn schedule_recreate(&mut self) {
        self.pending_recreate = Some((self.extent.width, self.extent.height));
    }

    /// Rebuild the swapchain for a new window size
    ///
    /// A zero-area size records the request and returns without touching
    /// the swapchain; the next acquire retries it.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            engine_trace!(
                "nebula::vulkan",
                "Deferring swapchain recreation for zero-area extent {}x{}",
                width,
                height
            );
            self.pending_recreate = Some((width, height));
            return Ok(());
        }

        unsafe {
            self.context.device.device_wait_idle().map_err(|e| {
                engine_err!("nebula::vulkan", "Failed to wait idle before swapchain recreate: {:?}", e)
            })?;
        }

        self.create_swapchain(width, height)
    }

    fn create_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        let context = self.context.clone();
        let loader = &context.swapchain_loader;

        unsafe {
            let caps = context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, self.surface)
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to query surface capabilities: {:?}", e);
                    Error::InitializationFailed(format!(
                        "Failed to query surface capabilities: {:?}",
                        e
                    ))
                })?;

            let formats = context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, self.surface)
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to query surface formats: {:?}", e);
                    Error::InitializationFailed(format!("Failed to query surface formats: {:?}", e))
                })?;
            if formats.is_empty() {
                return Err(Error::InitializationFailed(
                    "Surface reports no formats".to_string(),
                ));
            }

            let present_modes = context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, self.surface)
                .map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to query present modes: {:?}", e);
                    Error::InitializationFailed(format!("Failed to query present modes: {:?}", e))
                })?;

            let surface_format = choose_surface_format(&formats);
            let present_mode = choose_present_mode(&present_modes);
            let extent = choose_extent(&caps, width, height);

            if extent.width == 0 || extent.height == 0 {
                self.pending_recreate = Some((width, height));
                return Ok(());
            }

            let image_count = choose_image_count(&caps);

            let family_indices = [self.graphics_family, self.present_family];
            let mut create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .pre_transform(caps.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(self.swapchain);

            // Concurrent sharing only when presentation lives on another family
            create_info = if self.graphics_family != self.present_family {
                create_info
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&family_indices)
            } else {
                create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            };

            let new_swapchain = loader.create_swapchain(&create_info, None).map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to create swapchain: {:?}", e);
                Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
            })?;

            // Tear down the previous incarnation
            for &view in &self.image_views {
                context.device.destroy_image_view(view, None);
            }
            self.image_views.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.swapchain, None);
            }

            self.swapchain = new_swapchain;
            self.format = surface_format.format;
            self.color_space = surface_format.color_space;
            self.extent = extent;

            self.images = loader.get_swapchain_images(new_swapchain).map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to get swapchain images: {:?}", e);
                Error::InitializationFailed(format!("Failed to get swapchain images: {:?}", e))
            })?;

            for &image in &self.images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                let view = context.device.create_image_view(&view_info, None).map_err(|e| {
                    engine_error!("nebula::vulkan", "Failed to create swapchain image view: {:?}", e);
                    Error::InitializationFailed(format!(
                        "Failed to create swapchain image view: {:?}",
                        e
                    ))
                })?;
                self.image_views.push(view);
            }
        }

        engine_trace!(
            "nebula::vulkan",
            "Swapchain created: {}x{}, {} images, format {:?}",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.format
        );

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.context.device.device_wait_idle().ok();

            for &view in &self.image_views {
                self.context.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.context
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            self.context.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_swapchain_tests.rs"]
mod tests;
