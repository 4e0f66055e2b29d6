use bytemuck::Pod;

use crate::backend::{Backend, BufferUsage, CommandList, PipelineDescription};
use crate::config::RendererConfig;
use crate::error::RenderError;
use crate::recorder::{CommandRecorder, FrameOutcome, RecorderStats};
use crate::resource::{Drawable, GpuBuffer, PipelineState};
use crate::swapchain::{FullscreenOutcome, ResizeOutcome, SwapChainManager, SwapChainState};
use crate::sync::{FrameSynchronizer, SyncStats};
use crate::upload::{UploadPipeline, UploadStats};

/// Facade over the frame-rendering core.
///
/// Owns the backend and every core component. All operations run on the
/// calling thread; the only blocking points are fence waits.
pub struct Renderer<B: Backend> {
    // Declared before `backend` so GPU objects are dropped while the device is alive.
    swap_chain: SwapChainManager<B>,
    sync: FrameSynchronizer<B>,
    root_signature: B::RootSignature,
    uploads: UploadPipeline,
    recorder: CommandRecorder,
    config: RendererConfig,
    /// Set by a successful [`Renderer::shutdown`]; cleared by the next submission.
    drained: bool,
    backend: B,
}

impl<B: Backend> Renderer<B> {
    /// Builds the core on top of `backend` and drains the device once so
    /// every slot starts idle.
    pub fn new(mut backend: B, config: RendererConfig) -> Result<Self, RenderError> {
        let _span = tracing::info_span!("renderer_setup").entered();

        let root_signature = backend.create_root_signature()?;
        let mut swap_chain = SwapChainManager::new(&backend);
        let current = swap_chain.current_index();
        let mut sync = FrameSynchronizer::new(&mut backend, current, config.wait_timeout())?;

        sync.begin_recording(&mut backend, current)?;
        swap_chain.rebuild_framebuffers(&mut backend)?;
        let mut setup: CommandList<'_, B> = CommandList::new("setup");
        setup.close();
        backend.execute(sync.allocator_mut(current), &setup)?;
        sync.mark_submitted(current);
        sync.wait_for_device_idle(&mut backend, current)?;

        let state = swap_chain.state();
        tracing::info!(
            width = state.width,
            height = state.height,
            back_buffer = state.current_back_buffer_index,
            timeout_ms = ?config.wait_timeout_ms,
            "renderer ready"
        );

        Ok(Self {
            swap_chain,
            sync,
            root_signature,
            uploads: UploadPipeline::new(),
            recorder: CommandRecorder::new(config.clear_color()),
            config,
            drained: false,
            backend,
        })
    }

    /// Records, submits and presents one frame drawing `entities` in order.
    pub fn render(&mut self, entities: &[&dyn Drawable<B>]) -> Result<FrameOutcome, RenderError> {
        self.drained = false;
        self.recorder.render_frame(
            &mut self.backend,
            &mut self.sync,
            &mut self.swap_chain,
            &self.root_signature,
            entities,
        )
    }

    pub fn set_window_size(
        &mut self,
        width: u32,
        height: u32,
        minimized: bool,
    ) -> Result<ResizeOutcome, RenderError> {
        self.swap_chain
            .resize(&mut self.backend, &mut self.sync, width, height, minimized)
    }

    pub fn toggle_fullscreen(&mut self) -> FullscreenOutcome {
        self.swap_chain.toggle_fullscreen(&mut self.backend)
    }

    pub fn upload_vertex_data(&mut self, bytes: &[u8]) -> Result<GpuBuffer<B>, RenderError> {
        self.upload(bytes, BufferUsage::VertexOrConstant)
    }

    pub fn upload_index_data(&mut self, bytes: &[u8]) -> Result<GpuBuffer<B>, RenderError> {
        self.upload(bytes, BufferUsage::Index)
    }

    pub fn upload_vertices<T: Pod>(&mut self, vertices: &[T]) -> Result<GpuBuffer<B>, RenderError> {
        self.upload_vertex_data(bytemuck::cast_slice(vertices))
    }

    pub fn upload_indices<T: Pod>(&mut self, indices: &[T]) -> Result<GpuBuffer<B>, RenderError> {
        self.upload_index_data(bytemuck::cast_slice(indices))
    }

    pub fn build_pipeline_state(
        &mut self,
        desc: &PipelineDescription,
    ) -> Result<PipelineState<B>, RenderError> {
        let raw = self
            .backend
            .create_pipeline_state(desc, &self.root_signature)?;
        tracing::debug!(label = %desc.label, topology = ?desc.topology, "pipeline state built");
        Ok(PipelineState::new(raw, desc.label.clone()))
    }

    pub fn wait_for_device_idle(&mut self) -> Result<(), RenderError> {
        let current = self.swap_chain.current_index();
        self.sync.wait_for_device_idle(&mut self.backend, current)
    }

    /// Reads back the logical contents of `buffer`.
    pub fn read_buffer(&mut self, buffer: &GpuBuffer<B>) -> Result<Vec<u8>, RenderError> {
        let mut bytes = self.backend.read_buffer(buffer.raw(), buffer.size())?;
        bytes.truncate(buffer.size() as usize);
        Ok(bytes)
    }

    pub fn swap_chain_state(&self) -> SwapChainState {
        self.swap_chain.state()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn recorder_stats(&self) -> RecorderStats {
        self.recorder.stats()
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.uploads.stats()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Drains the GPU and leaves fullscreen.
    ///
    /// Fence-wait failures are returned so the caller can treat them as
    /// fatal; dropping the renderer only logs them. A failure to leave
    /// fullscreen is logged and does not fail the shutdown.
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        let _span = tracing::info_span!("renderer_shutdown").entered();
        self.wait_for_device_idle()?;
        self.leave_fullscreen();
        self.drained = true;
        tracing::info!(
            frames = self.recorder.stats().frames,
            uploads = self.uploads.stats().uploads,
            "renderer shut down"
        );
        Ok(())
    }

    fn leave_fullscreen(&mut self) {
        if let Err(e) = self.backend.set_fullscreen_state(false) {
            tracing::warn!(error = %e, "failed to leave fullscreen during shutdown");
        }
    }

    fn upload(&mut self, bytes: &[u8], usage: BufferUsage) -> Result<GpuBuffer<B>, RenderError> {
        self.drained = false;
        self.uploads.upload(
            &mut self.backend,
            &mut self.sync,
            &self.swap_chain,
            bytes,
            usage,
        )
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if self.drained {
            return;
        }
        if let Err(e) = self.wait_for_device_idle() {
            tracing::error!(error = %e, "failed to drain device during shutdown");
        }
        self.leave_fullscreen();
    }
}
