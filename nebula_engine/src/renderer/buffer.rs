/// Buffer resource traits shared by all backends

use crate::error::Result;

/// Vertex buffer resource
pub trait VertexBuffer: Send + Sync {
    /// Update buffer contents at a byte offset
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Number of vertices the buffer was created for
    fn vertex_count(&self) -> u32;
}

/// Index buffer resource
pub trait IndexBuffer: Send + Sync {
    /// Update buffer contents at a byte offset
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Number of indices the buffer was created for
    fn index_count(&self) -> u32;
}

/// Storage buffer resource
///
/// Device-local buffer addressable from both compute and graphics shaders.
/// Storage buffers are the subject of queue ownership transfers when a
/// dedicated compute queue family exists.
pub trait StorageBuffer: Send + Sync {
    /// Update buffer contents at a byte offset
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Buffer size in bytes
    fn size(&self) -> u64;
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Element count (vertices or indices; 0 for plain storage)
    pub element_count: u32,
    pub usage: BufferUsage,
}

/// What a buffer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Storage,
}
