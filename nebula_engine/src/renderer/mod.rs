/// Renderer module - all rendering-related types and traits

// Module declarations
pub mod renderer;
pub mod texture;
pub mod buffer;
pub mod render_pass;
pub mod pipeline;
pub mod command_buffer;

mod mock_renderer;

#[cfg(test)]
pub use mock_renderer::*;

// Re-export everything from renderer.rs
pub use renderer::*;

// Re-export from other modules
pub use texture::*;
pub use buffer::*;
pub use render_pass::*;
pub use pipeline::*;
pub use command_buffer::*;
