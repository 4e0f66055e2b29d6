//! Swap chain manager.
//!
//! # Invariants
//! - The swap chain always has [`BACK_BUFFER_COUNT`] buffers.
//! - No command may reference a render target while `needs_framebuffer_rebuild` is set.
//! - Render-target views are released before the backend resizes its buffers.

use leapbox_common::Extent2D;
use serde::Serialize;

use crate::FRAME_COUNT;
use crate::backend::{Backend, ScissorRect, Viewport};
use crate::error::RenderError;
use crate::sync::FrameSynchronizer;

pub const BACK_BUFFER_COUNT: usize = FRAME_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapChainState {
    pub width: u32,
    pub height: u32,
    pub back_buffer_count: usize,
    pub current_back_buffer_index: usize,
    pub needs_framebuffer_rebuild: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResizeOutcome {
    /// Same dimensions; nothing was recreated.
    Unchanged,
    /// Buffers were resized; framebuffers rebuild on the next frame.
    Resized,
    /// Window is minimized; frames are skipped until it is shown again.
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FullscreenOutcome {
    Entered,
    Exited,
    Failed,
}

pub struct SwapChainManager<B: Backend> {
    state: SwapChainState,
    render_targets: Vec<B::RenderTarget>,
    viewport: Viewport,
    scissor: ScissorRect,
    rebuild_count: u64,
}

impl<B: Backend> SwapChainManager<B> {
    pub fn new(backend: &B) -> Self {
        let extent = backend.swap_chain_extent();
        Self {
            state: SwapChainState {
                width: extent.width,
                height: extent.height,
                back_buffer_count: BACK_BUFFER_COUNT,
                current_back_buffer_index: backend.current_back_buffer_index(),
                needs_framebuffer_rebuild: true,
                visible: true,
            },
            render_targets: Vec::with_capacity(BACK_BUFFER_COUNT),
            viewport: Viewport::covering(extent),
            scissor: ScissorRect::covering(extent),
            rebuild_count: 0,
        }
    }

    pub fn state(&self) -> SwapChainState {
        self.state
    }

    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.state.width, self.state.height)
    }

    pub fn current_index(&self) -> usize {
        self.state.current_back_buffer_index
    }

    pub fn is_visible(&self) -> bool {
        self.state.visible
    }

    pub fn needs_framebuffer_rebuild(&self) -> bool {
        self.state.needs_framebuffer_rebuild
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> ScissorRect {
        self.scissor
    }

    /// How many times the render-target views have been (re)created.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Applies a window size change.
    ///
    /// A zero-sized window is treated as minimized.
    pub fn resize(
        &mut self,
        backend: &mut B,
        sync: &mut FrameSynchronizer<B>,
        width: u32,
        height: u32,
        minimized: bool,
    ) -> Result<ResizeOutcome, RenderError> {
        let hidden = minimized || Extent2D::new(width, height).is_empty();
        let mut resized = false;

        if !hidden && (width, height) != (self.state.width, self.state.height) {
            let _span = tracing::info_span!("resize_swap_chain", width, height).entered();
            self.state.width = width;
            self.state.height = height;

            let current = self.state.current_back_buffer_index;
            sync.wait_for_device_idle(backend, current)?;
            self.render_targets.clear();
            sync.resynchronize(current);

            backend.resize_swap_chain(BACK_BUFFER_COUNT, width, height)?;
            self.requery_back_buffer_index(backend);
            self.state.needs_framebuffer_rebuild = true;
            resized = true;
            tracing::info!(
                width,
                height,
                back_buffer = self.state.current_back_buffer_index,
                "swap chain resized"
            );
        }

        self.state.visible = !hidden;

        Ok(if hidden {
            ResizeOutcome::Hidden
        } else if resized {
            ResizeOutcome::Resized
        } else {
            ResizeOutcome::Unchanged
        })
    }

    /// Recreates viewport, scissor and one render-target view per back buffer.
    pub fn rebuild_framebuffers(&mut self, backend: &mut B) -> Result<(), RenderError> {
        let extent = self.extent();
        self.viewport = Viewport::covering(extent);
        self.scissor = ScissorRect::covering(extent);

        self.render_targets.clear();
        for index in 0..BACK_BUFFER_COUNT {
            self.render_targets.push(backend.create_render_target(index)?);
        }
        self.state.needs_framebuffer_rebuild = false;
        self.rebuild_count += 1;
        tracing::debug!(
            width = extent.width,
            height = extent.height,
            rebuild = self.rebuild_count,
            "framebuffers rebuilt"
        );
        Ok(())
    }

    pub fn current_render_target(&self) -> Result<&B::RenderTarget, RenderError> {
        if self.state.needs_framebuffer_rebuild {
            return Err(RenderError::StaleFramebuffers);
        }
        self.render_targets
            .get(self.state.current_back_buffer_index)
            .ok_or(RenderError::StaleFramebuffers)
    }

    /// Flips between windowed and fullscreen. Failures are logged and leave
    /// the current mode in place.
    pub fn toggle_fullscreen(&mut self, backend: &mut B) -> FullscreenOutcome {
        let target = match backend.fullscreen_state() {
            Ok(fullscreen) => !fullscreen,
            Err(e) => {
                tracing::warn!(error = %e, "could not query fullscreen state");
                return FullscreenOutcome::Failed;
            }
        };
        match backend.set_fullscreen_state(target) {
            Ok(()) if target => {
                tracing::info!("entered fullscreen");
                FullscreenOutcome::Entered
            }
            Ok(()) => {
                tracing::info!("left fullscreen");
                FullscreenOutcome::Exited
            }
            Err(e) => {
                tracing::warn!(error = %e, fullscreen = target, "fullscreen transition failed");
                FullscreenOutcome::Failed
            }
        }
    }

    pub fn requery_back_buffer_index(&mut self, backend: &B) -> usize {
        self.state.current_back_buffer_index = backend.current_back_buffer_index();
        self.state.current_back_buffer_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;

    fn setup() -> (
        HeadlessBackend,
        SwapChainManager<HeadlessBackend>,
        FrameSynchronizer<HeadlessBackend>,
    ) {
        let mut backend = HeadlessBackend::new(Extent2D::new(1280, 720));
        let swap = SwapChainManager::new(&backend);
        let sync = FrameSynchronizer::new(&mut backend, swap.current_index(), None).unwrap();
        (backend, swap, sync)
    }

    #[test]
    fn starts_dirty_with_two_buffers() {
        let (_, swap, _) = setup();
        let state = swap.state();
        assert_eq!(state.back_buffer_count, 2);
        assert!(state.needs_framebuffer_rebuild);
        assert!(state.visible);
        assert!(state.current_back_buffer_index < 2);
        assert!(matches!(
            swap.current_render_target(),
            Err(RenderError::StaleFramebuffers)
        ));
    }

    #[test]
    fn rebuild_clears_dirty_flag() {
        let (mut backend, mut swap, _) = setup();
        swap.rebuild_framebuffers(&mut backend).unwrap();
        assert!(!swap.needs_framebuffer_rebuild());
        assert!(swap.current_render_target().is_ok());
        assert_eq!(backend.stats().render_targets_created, 2);
        assert_eq!(swap.rebuild_count(), 1);
    }

    #[test]
    fn identical_resize_is_a_no_op() {
        let (mut backend, mut swap, mut sync) = setup();
        swap.rebuild_framebuffers(&mut backend).unwrap();

        let first = swap.resize(&mut backend, &mut sync, 800, 600, false).unwrap();
        assert_eq!(first, ResizeOutcome::Resized);
        swap.rebuild_framebuffers(&mut backend).unwrap();

        let second = swap.resize(&mut backend, &mut sync, 800, 600, false).unwrap();
        assert_eq!(second, ResizeOutcome::Unchanged);
        assert_eq!(backend.stats().resizes, 1);
        assert!(!swap.needs_framebuffer_rebuild());
    }

    #[test]
    fn resize_drains_and_marks_dirty() {
        let (mut backend, mut swap, mut sync) = setup();
        swap.rebuild_framebuffers(&mut backend).unwrap();
        let idle_before = sync.stats().idle_waits;

        swap.resize(&mut backend, &mut sync, 800, 600, false).unwrap();

        assert_eq!(sync.stats().idle_waits, idle_before + 1);
        assert_eq!(swap.extent(), Extent2D::new(800, 600));
        assert!(swap.needs_framebuffer_rebuild());
        assert_eq!(swap.current_index(), backend.current_back_buffer_index());
        let value = sync.slot(0).fence_value();
        assert_eq!(sync.slot(1).fence_value(), value);
    }

    #[test]
    fn minimize_hides_without_recreating() {
        let (mut backend, mut swap, mut sync) = setup();
        swap.rebuild_framebuffers(&mut backend).unwrap();

        let outcome = swap.resize(&mut backend, &mut sync, 0, 0, true).unwrap();
        assert_eq!(outcome, ResizeOutcome::Hidden);
        assert!(!swap.is_visible());
        assert_eq!(backend.stats().resizes, 0);
        assert_eq!(swap.extent(), Extent2D::new(1280, 720));

        let outcome = swap.resize(&mut backend, &mut sync, 1280, 720, false).unwrap();
        assert_eq!(outcome, ResizeOutcome::Unchanged);
        assert!(swap.is_visible());
    }

    #[test]
    fn zero_extent_counts_as_minimized() {
        let (mut backend, mut swap, mut sync) = setup();
        let outcome = swap.resize(&mut backend, &mut sync, 0, 600, false).unwrap();
        assert_eq!(outcome, ResizeOutcome::Hidden);
        assert_eq!(backend.stats().resizes, 0);
    }

    #[test]
    fn toggle_fullscreen_alternates() {
        let (mut backend, mut swap, _) = setup();
        assert_eq!(swap.toggle_fullscreen(&mut backend), FullscreenOutcome::Entered);
        assert!(backend.fullscreen_state().unwrap());
        assert_eq!(swap.toggle_fullscreen(&mut backend), FullscreenOutcome::Exited);
        assert!(!backend.fullscreen_state().unwrap());
    }

    #[test]
    fn failed_fullscreen_keeps_state() {
        let (mut backend, mut swap, _) = setup();
        backend.set_fullscreen_failure(true);
        assert_eq!(swap.toggle_fullscreen(&mut backend), FullscreenOutcome::Failed);
        assert!(!backend.fullscreen_state().unwrap());
    }
}
