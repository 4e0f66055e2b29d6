//! Frame-rendering core: double-buffered presentation, per-frame command
//! recording and fence-based CPU/GPU synchronization, plus the blocking
//! upload path used to stage vertex and index data.
//!
//! # Invariants
//! - Exactly [`FRAME_COUNT`] back buffers and frame slots.
//! - A command allocator is never reset while the device may still execute
//!   commands recorded from it.
//! - Nothing references a render target between a resize and the next
//!   framebuffer rebuild.
//! - All core state is owned by [`Renderer`] and mutated from one thread.

pub mod backend;
mod config;
mod error;
pub mod headless;
mod recorder;
mod renderer;
mod resource;
mod swapchain;
mod sync;
mod upload;

pub use backend::{
    Backend, BufferUsage, IndexFormat, PipelineDescription, PrimitiveTopology, ShaderSource,
    VertexAttribute, VertexFormat,
};
pub use config::RendererConfig;
pub use error::{BackendError, ConfigError, RenderError};
pub use recorder::{FrameOutcome, RecorderStats};
pub use renderer::Renderer;
pub use resource::{Drawable, GpuBuffer, IndexBinding, MaterialView, MeshView, PipelineState};
pub use swapchain::{BACK_BUFFER_COUNT, FullscreenOutcome, ResizeOutcome, SwapChainState};
pub use sync::{FrameSlot, SlotState, SyncStats};
pub use upload::UploadStats;

/// Frames in flight; one per back buffer.
pub const FRAME_COUNT: usize = 2;

pub fn crate_info() -> &'static str {
    "leapbox-render v0.1.0"
}
