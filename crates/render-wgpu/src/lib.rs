//! wgpu implementation of the leapbox device backend.
//!
//! Maps the core's explicit model onto wgpu:
//! - fences are emulated with queue completion callbacks,
//! - the back-buffer index follows the number of presents,
//! - command lists become one command encoder with at most one open render pass,
//! - resource transitions are implicit.

mod backend;
mod conversions;
mod fence;
mod shaders;

pub use backend::{
    WgpuAllocator, WgpuBackend, WgpuBuffer, WgpuPipeline, WgpuRenderTarget, WgpuRootSignature,
};
pub use conversions::IntoWgpu;
pub use fence::WgpuFence;
pub use shaders::{COLOR_SHADER, COLOR_SHADER_FRAGMENT_ENTRY, COLOR_SHADER_VERTEX_ENTRY};
