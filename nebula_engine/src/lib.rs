/*!
# Nebula Engine

Core traits and types for the Nebula rendering engine.

This crate provides the platform-agnostic API for rendering using trait-based
dynamic polymorphism. Backend implementations (currently Vulkan) implement
these traits in separate crates.

## Architecture

- **Renderer**: factory trait for creating GPU resources
- **Renderpass**: declarative subpass/attachment description with derived
  dependencies and clear values
- **CmdBuffer**: per-frame recording across the graphics, transfer and
  compute queues, including cross-queue synchronization and queue
  ownership transfers
- **GraphicsPipeline / ComputePipeline**: reflection-driven pipeline objects
- **Texture2D / StorageBuffer / VertexBuffer / IndexBuffer**: GPU resources
*/

// Internal modules
pub mod error;
pub mod log;
pub mod renderer;

// Main nebula namespace module
pub mod nebula {
    // Error types
    pub use crate::error::{Error, Result};

    // Renderer factory trait
    pub use crate::renderer::Renderer;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger, set_logger, reset_logger};
        // Note: engine_* macros are NOT re-exported here - they live at the crate root
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::renderer::*;
    }
}

// Re-export math library at crate root
pub use glam;
