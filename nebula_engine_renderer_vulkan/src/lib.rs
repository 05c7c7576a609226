/*!
# Nebula Engine - Vulkan Renderer Backend

Vulkan implementation of the Nebula rendering engine.

This crate provides a Vulkan backend that implements the nebula_engine traits
using the Ash library for Vulkan bindings and gpu-allocator for memory
management. Shader reflection is done with spirq.

The backend drives three queue lanes (graphics, compute, transfer) with
per-frame synchronization objects and derives renderpass dependencies from
declarative configs.
*/

// Vulkan implementation modules
mod vulkan;
mod vulkan_context;
mod vulkan_swapchain;
mod vulkan_render_pass;
mod vulkan_cmd_buffer;
mod vulkan_texture;
mod vulkan_buffer;
mod vulkan_shader;
mod vulkan_pipeline;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan::VulkanRenderer;
pub use vulkan_context::{GpuContext, QueueRegistry};
pub use vulkan_swapchain::Swapchain;
pub use vulkan_render_pass::Renderpass;
pub use vulkan_cmd_buffer::CmdBuffer;
