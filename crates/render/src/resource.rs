//! Owned GPU resources and the read-only contracts drawables expose to the recorder.

use crate::backend::{Backend, BufferUsage, IndexFormat, PrimitiveTopology};

/// A device buffer owned exclusively by whoever holds this value.
pub struct GpuBuffer<B: Backend> {
    raw: B::Buffer,
    size: u64,
    usage: BufferUsage,
}

impl<B: Backend> GpuBuffer<B> {
    pub(crate) fn new(raw: B::Buffer, size: u64, usage: BufferUsage) -> Self {
        Self { raw, size, usage }
    }

    /// Logical size in bytes (backends may allocate more for alignment).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn raw(&self) -> &B::Buffer {
        &self.raw
    }
}

impl<B: Backend> std::fmt::Debug for GpuBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

/// A pipeline state object bound to the renderer's global root signature.
pub struct PipelineState<B: Backend> {
    raw: B::Pipeline,
    label: String,
}

impl<B: Backend> PipelineState<B> {
    pub(crate) fn new(raw: B::Pipeline, label: String) -> Self {
        Self { raw, label }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn raw(&self) -> &B::Pipeline {
        &self.raw
    }
}

impl<B: Backend> std::fmt::Debug for PipelineState<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("label", &self.label)
            .finish()
    }
}

pub struct IndexBinding<'a, B: Backend> {
    pub buffer: &'a GpuBuffer<B>,
    pub format: IndexFormat,
}

/// Exposes the GPU buffers and draw parameters of a mesh.
pub trait MeshView<B: Backend> {
    fn vertex_buffer(&self) -> &GpuBuffer<B>;
    fn vertex_stride(&self) -> u32;
    fn vertex_count(&self) -> u32;
    fn index_buffer(&self) -> Option<IndexBinding<'_, B>>;
    fn index_count(&self) -> u32;
    fn topology(&self) -> PrimitiveTopology;
}

/// Exposes the pipeline state of a material.
pub trait MaterialView<B: Backend> {
    fn pipeline_state(&self) -> &PipelineState<B>;
}

/// Something the recorder can draw. Read-only; ownership stays with the scene.
pub trait Drawable<B: Backend> {
    fn mesh(&self) -> &dyn MeshView<B>;
    fn material(&self) -> &dyn MaterialView<B>;
}
