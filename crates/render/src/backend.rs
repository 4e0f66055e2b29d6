//! Device context seam.
//!
//! A [`Backend`] owns the logical device, its single command queue and the
//! presentation surface. Every GPU object the core touches is created here and
//! owned by whichever core component asked for it; releasing it is just `Drop`.
//!
//! Command lists are recorded by the core as a backend-neutral [`Command`]
//! stream that borrows the resources it references, and are translated by the
//! backend in [`Backend::execute`].

use std::time::Duration;

use leapbox_common::{ClearColor, Extent2D};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Intended usage of a buffer. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    /// Device-local vertex (or constant) data.
    VertexOrConstant,
    /// Device-local index data.
    Index,
    /// Host-visible staging memory used as a copy source.
    UploadStaging,
}

impl BufferUsage {
    /// State a destination buffer is transitioned to once its upload copy completes.
    pub fn resting_state(self) -> ResourceState {
        match self {
            BufferUsage::VertexOrConstant => ResourceState::VertexAndConstantBuffer,
            BufferUsage::Index => ResourceState::IndexBuffer,
            BufferUsage::UploadStaging => ResourceState::GenericRead,
        }
    }
}

/// Usage state declared by resource barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Present,
    RenderTarget,
    CopyDest,
    GenericRead,
    VertexAndConstantBuffer,
    IndexBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: VertexFormat,
}

/// Shader source handed through opaquely from the asset layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    pub source: String,
}

/// Everything needed to build a pipeline state object against the global root signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescription {
    pub label: String,
    pub shader: ShaderSource,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub vertex_stride: u32,
    pub attributes: Vec<VertexAttribute>,
    pub topology: PrimitiveTopology,
}

impl PipelineDescription {
    /// Checks the vertex layout is self-consistent.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.vertex_stride == 0 {
            return Err(BackendError::InvalidUsage(format!(
                "pipeline '{}' has a zero vertex stride",
                self.label
            )));
        }
        for attr in &self.attributes {
            if attr.offset + attr.format.byte_size() > self.vertex_stride {
                return Err(BackendError::InvalidUsage(format!(
                    "pipeline '{}': attribute {} overruns the {}-byte stride",
                    self.label, attr.location, self.vertex_stride
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn covering(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl ScissorRect {
    pub fn covering(extent: Extent2D) -> Self {
        Self {
            left: 0,
            top: 0,
            right: extent.width,
            bottom: extent.height,
        }
    }
}

/// Resource named by a barrier.
pub enum BarrierTarget<'a, B: Backend> {
    BackBuffer(&'a B::RenderTarget),
    Buffer(&'a B::Buffer),
}

/// One recorded instruction.
pub enum Command<'a, B: Backend> {
    SetRootSignature(&'a B::RootSignature),
    SetDescriptorTable(&'a B::RootSignature),
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    Transition {
        target: BarrierTarget<'a, B>,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTarget(&'a B::RenderTarget),
    ClearRenderTarget {
        target: &'a B::RenderTarget,
        color: ClearColor,
    },
    SetPipelineState(&'a B::Pipeline),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer {
        buffer: &'a B::Buffer,
        stride: u32,
        size: u64,
    },
    SetIndexBuffer {
        buffer: &'a B::Buffer,
        format: IndexFormat,
        size: u64,
    },
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    CopyBuffer {
        src: &'a B::Buffer,
        dst: &'a B::Buffer,
        size: u64,
    },
}

impl<B: Backend> Command<'_, B> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetRootSignature(_) => "SetRootSignature",
            Command::SetDescriptorTable(_) => "SetDescriptorTable",
            Command::SetViewport(_) => "SetViewport",
            Command::SetScissorRect(_) => "SetScissorRect",
            Command::Transition { .. } => "Transition",
            Command::SetRenderTarget(_) => "SetRenderTarget",
            Command::ClearRenderTarget { .. } => "ClearRenderTarget",
            Command::SetPipelineState(_) => "SetPipelineState",
            Command::SetPrimitiveTopology(_) => "SetPrimitiveTopology",
            Command::SetVertexBuffer { .. } => "SetVertexBuffer",
            Command::SetIndexBuffer { .. } => "SetIndexBuffer",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::CopyBuffer { .. } => "CopyBuffer",
        }
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw { .. } | Command::DrawIndexed { .. })
    }
}

/// An ordered command stream. Must be closed before it can be executed.
pub struct CommandList<'a, B: Backend> {
    label: &'static str,
    commands: Vec<Command<'a, B>>,
    closed: bool,
}

impl<'a, B: Backend> CommandList<'a, B> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            commands: Vec::new(),
            closed: false,
        }
    }

    pub(crate) fn record(&mut self, command: Command<'a, B>) {
        debug_assert!(!self.closed, "recording into closed command list");
        self.commands.push(command);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn commands(&self) -> &[Command<'a, B>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }
}

/// Logical device + single command queue + presentation surface.
///
/// Queue and fence operations take `&mut self`: there is exactly one
/// submission thread and the core reaches the backend only through the
/// renderer that owns it.
pub trait Backend: Sized {
    type Buffer;
    type Pipeline;
    type RootSignature;
    type Allocator;
    type Fence;
    type RenderTarget;

    fn create_root_signature(&mut self) -> Result<Self::RootSignature, BackendError>;

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineDescription,
        root: &Self::RootSignature,
    ) -> Result<Self::Pipeline, BackendError>;

    fn create_command_allocator(&mut self) -> Result<Self::Allocator, BackendError>;

    fn create_fence(&mut self, initial_value: u64) -> Result<Self::Fence, BackendError>;

    /// Staging buffers come back host-visible and writable through
    /// [`Backend::write_staging`]; every other usage is device-local.
    fn create_buffer(&mut self, size: u64, usage: BufferUsage)
        -> Result<Self::Buffer, BackendError>;

    fn write_staging(&mut self, staging: &Self::Buffer, bytes: &[u8]) -> Result<(), BackendError>;

    /// Diagnostic read-back of a buffer's current device contents.
    fn read_buffer(&mut self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, BackendError>;

    fn reset_allocator(&mut self, allocator: &mut Self::Allocator) -> Result<(), BackendError>;

    fn execute(
        &mut self,
        allocator: &mut Self::Allocator,
        list: &CommandList<'_, Self>,
    ) -> Result<(), BackendError>;

    /// Queues a fence signal behind all previously executed work.
    fn signal(&mut self, fence: &Self::Fence, value: u64) -> Result<(), BackendError>;

    fn completed_value(&mut self, fence: &Self::Fence) -> u64;

    /// Blocks until the fence reaches `value`. `None` waits forever.
    fn wait_for_value(
        &mut self,
        fence: &Self::Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError>;

    fn swap_chain_extent(&self) -> Extent2D;

    fn current_back_buffer_index(&self) -> usize;

    /// Requires every render-target view of the old buffers to have been dropped.
    fn resize_swap_chain(
        &mut self,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError>;

    fn create_render_target(&mut self, index: usize) -> Result<Self::RenderTarget, BackendError>;

    fn present(&mut self) -> Result<(), BackendError>;

    fn fullscreen_state(&self) -> Result<bool, BackendError>;

    fn set_fullscreen_state(&mut self, fullscreen: bool) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_layout(stride: u32) -> PipelineDescription {
        PipelineDescription {
            label: "test".into(),
            shader: ShaderSource {
                label: "shader".into(),
                source: String::new(),
            },
            vertex_entry: "vs_main".into(),
            fragment_entry: "fs_main".into(),
            vertex_stride: stride,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    location: 1,
                    offset: 12,
                    format: VertexFormat::Float32x4,
                },
            ],
            topology: PrimitiveTopology::TriangleList,
        }
    }

    #[test]
    fn pipeline_layout_fits_stride() {
        assert!(color_layout(28).validate().is_ok());
        assert!(color_layout(24).validate().is_err());
        assert!(color_layout(0).validate().is_err());
    }

    #[test]
    fn buffer_usage_resting_states() {
        assert_eq!(
            BufferUsage::VertexOrConstant.resting_state(),
            ResourceState::VertexAndConstantBuffer
        );
        assert_eq!(BufferUsage::Index.resting_state(), ResourceState::IndexBuffer);
    }

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let extent = Extent2D::new(1280, 720);
        let vp = Viewport::covering(extent);
        assert_eq!((vp.width, vp.height, vp.max_depth), (1280.0, 720.0, 1.0));
        let sr = ScissorRect::covering(extent);
        assert_eq!((sr.right, sr.bottom), (1280, 720));
    }
}
