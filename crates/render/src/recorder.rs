//! Per-frame command recording and submission.

use leapbox_common::ClearColor;
use serde::Serialize;

use crate::backend::{Backend, BarrierTarget, Command, CommandList, ResourceState};
use crate::error::RenderError;
use crate::resource::Drawable;
use crate::swapchain::SwapChainManager;
use crate::sync::FrameSynchronizer;

/// What happened to a requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameOutcome {
    Presented {
        /// Slot the frame was recorded into.
        slot: usize,
        /// Fence value signaled after the frame's submission.
        fence_value: u64,
        draws: u32,
        /// Whether moving on to the next slot had to block.
        waited: bool,
    },
    /// The window is hidden; nothing was recorded.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub frames: u64,
    pub draws: u64,
    pub framebuffer_rebuilds: u64,
}

pub struct CommandRecorder {
    clear_color: ClearColor,
    stats: RecorderStats,
}

impl CommandRecorder {
    pub fn new(clear_color: ClearColor) -> Self {
        Self {
            clear_color,
            stats: RecorderStats::default(),
        }
    }

    pub fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn render_frame<B: Backend>(
        &mut self,
        backend: &mut B,
        sync: &mut FrameSynchronizer<B>,
        swap_chain: &mut SwapChainManager<B>,
        root: &B::RootSignature,
        entities: &[&dyn Drawable<B>],
    ) -> Result<FrameOutcome, RenderError> {
        if !swap_chain.is_visible() {
            return Ok(FrameOutcome::Skipped);
        }

        let slot = swap_chain.current_index();
        let _span = tracing::trace_span!("render_frame", slot).entered();

        sync.begin_recording(backend, slot)?;

        if swap_chain.needs_framebuffer_rebuild() {
            swap_chain.rebuild_framebuffers(backend)?;
            self.stats.framebuffer_rebuilds += 1;
        }

        let draws = {
            let target = swap_chain.current_render_target()?;
            let mut list = CommandList::new("frame");

            list.record(Command::SetRootSignature(root));
            list.record(Command::SetDescriptorTable(root));
            list.record(Command::SetViewport(swap_chain.viewport()));
            list.record(Command::SetScissorRect(swap_chain.scissor()));

            list.record(Command::Transition {
                target: BarrierTarget::BackBuffer(target),
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            });
            list.record(Command::SetRenderTarget(target));
            list.record(Command::ClearRenderTarget {
                target,
                color: self.clear_color,
            });

            let mut draws = 0u32;
            for entity in entities {
                let mesh = entity.mesh();
                let material = entity.material();

                list.record(Command::SetPipelineState(material.pipeline_state().raw()));
                list.record(Command::SetPrimitiveTopology(mesh.topology()));
                let vertices = mesh.vertex_buffer();
                list.record(Command::SetVertexBuffer {
                    buffer: vertices.raw(),
                    stride: mesh.vertex_stride(),
                    size: vertices.size(),
                });
                match mesh.index_buffer() {
                    Some(indices) => {
                        list.record(Command::SetIndexBuffer {
                            buffer: indices.buffer.raw(),
                            format: indices.format,
                            size: indices.buffer.size(),
                        });
                        list.record(Command::DrawIndexed {
                            index_count: mesh.index_count(),
                        });
                    }
                    None => list.record(Command::Draw {
                        vertex_count: mesh.vertex_count(),
                    }),
                }
                draws += 1;
            }

            list.record(Command::Transition {
                target: BarrierTarget::BackBuffer(target),
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            });
            list.close();

            backend.execute(sync.allocator_mut(slot), &list)?;
            draws
        };
        sync.mark_submitted(slot);

        backend.present()?;
        let advance = sync.advance_frame(backend, swap_chain)?;

        self.stats.frames += 1;
        self.stats.draws += u64::from(draws);
        tracing::trace!(
            fence_value = advance.submitted_value,
            next = advance.next_slot,
            waited = advance.waited,
            draws,
            "frame presented"
        );

        Ok(FrameOutcome::Presented {
            slot,
            fence_value: advance.submitted_value,
            draws,
            waited: advance.waited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, IndexFormat, PrimitiveTopology};
    use crate::headless::{HeadlessBackend, RecordedCommand};
    use crate::resource::{GpuBuffer, IndexBinding, MaterialView, MeshView, PipelineState};
    use crate::upload::UploadPipeline;
    use leapbox_common::Extent2D;

    struct TestMesh {
        vertices: GpuBuffer<HeadlessBackend>,
        indices: Option<GpuBuffer<HeadlessBackend>>,
    }

    impl MeshView<HeadlessBackend> for TestMesh {
        fn vertex_buffer(&self) -> &GpuBuffer<HeadlessBackend> {
            &self.vertices
        }
        fn vertex_stride(&self) -> u32 {
            28
        }
        fn vertex_count(&self) -> u32 {
            (self.vertices.size() / 28) as u32
        }
        fn index_buffer(&self) -> Option<IndexBinding<'_, HeadlessBackend>> {
            self.indices.as_ref().map(|buffer| IndexBinding {
                buffer,
                format: IndexFormat::Uint16,
            })
        }
        fn index_count(&self) -> u32 {
            self.indices.as_ref().map_or(0, |b| (b.size() / 2) as u32)
        }
        fn topology(&self) -> PrimitiveTopology {
            PrimitiveTopology::TriangleList
        }
    }

    struct TestMaterial(PipelineState<HeadlessBackend>);

    impl MaterialView<HeadlessBackend> for TestMaterial {
        fn pipeline_state(&self) -> &PipelineState<HeadlessBackend> {
            &self.0
        }
    }

    struct TestEntity<'a>(&'a TestMesh, &'a TestMaterial);

    impl Drawable<HeadlessBackend> for TestEntity<'_> {
        fn mesh(&self) -> &dyn MeshView<HeadlessBackend> {
            self.0
        }
        fn material(&self) -> &dyn MaterialView<HeadlessBackend> {
            self.1
        }
    }

    struct Rig {
        backend: HeadlessBackend,
        swap: SwapChainManager<HeadlessBackend>,
        sync: FrameSynchronizer<HeadlessBackend>,
        root: <HeadlessBackend as Backend>::RootSignature,
        recorder: CommandRecorder,
    }

    fn rig() -> Rig {
        let mut backend = HeadlessBackend::new(Extent2D::new(1280, 720));
        let root = backend.create_root_signature().unwrap();
        let swap = SwapChainManager::new(&backend);
        let mut sync = FrameSynchronizer::new(&mut backend, swap.current_index(), None).unwrap();
        sync.wait_for_device_idle(&mut backend, swap.current_index())
            .unwrap();
        Rig {
            backend,
            swap,
            sync,
            root,
            recorder: CommandRecorder::new(ClearColor::default()),
        }
    }

    fn frame(r: &mut Rig, entities: &[&dyn Drawable<HeadlessBackend>]) -> FrameOutcome {
        r.recorder
            .render_frame(&mut r.backend, &mut r.sync, &mut r.swap, &r.root, entities)
            .unwrap()
    }

    fn mesh(r: &mut Rig, vertex_bytes: usize, index_bytes: Option<usize>) -> TestMesh {
        let mut uploads = UploadPipeline::new();
        let vertices = uploads
            .upload(
                &mut r.backend,
                &mut r.sync,
                &r.swap,
                &vec![0u8; vertex_bytes],
                BufferUsage::VertexOrConstant,
            )
            .unwrap();
        let indices = index_bytes.map(|n| {
            uploads
                .upload(&mut r.backend, &mut r.sync, &r.swap, &vec![0u8; n], BufferUsage::Index)
                .unwrap()
        });
        TestMesh { vertices, indices }
    }

    fn material(r: &mut Rig) -> TestMaterial {
        use crate::backend::{PipelineDescription, ShaderSource};
        let desc = PipelineDescription {
            label: "test".into(),
            shader: ShaderSource {
                label: "test".into(),
                source: String::new(),
            },
            vertex_entry: "vs_main".into(),
            fragment_entry: "fs_main".into(),
            vertex_stride: 28,
            attributes: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
        };
        let raw = r.backend.create_pipeline_state(&desc, &r.root).unwrap();
        TestMaterial(PipelineState::new(raw, desc.label))
    }

    #[test]
    fn empty_frame_clears_and_presents() {
        let mut r = rig();
        let outcome = frame(&mut r, &[]);

        assert!(matches!(outcome, FrameOutcome::Presented { draws: 0, .. }));
        let record = r.backend.last_record().unwrap();
        assert_eq!(
            record.names(),
            vec![
                "SetRootSignature",
                "SetDescriptorTable",
                "SetViewport",
                "SetScissorRect",
                "Transition",
                "SetRenderTarget",
                "ClearRenderTarget",
                "Transition",
            ]
        );
        assert!(record.commands.iter().any(|c| matches!(
            c,
            RecordedCommand::ClearRenderTarget { color, .. } if color.to_array() == [0.0, 0.6, 0.8, 1.0]
        )));
        assert_eq!(r.backend.stats().presents, 1);
        assert_eq!(r.recorder.stats().framebuffer_rebuilds, 1);
    }

    #[test]
    fn first_frame_rebuilds_once() {
        let mut r = rig();
        frame(&mut r, &[]);
        frame(&mut r, &[]);
        frame(&mut r, &[]);
        assert_eq!(r.swap.rebuild_count(), 1);
        assert_eq!(r.recorder.stats().frames, 3);
    }

    #[test]
    fn non_indexed_and_indexed_draws() {
        let mut r = rig();
        let quad = mesh(&mut r, 4 * 28, None);
        let cube = mesh(&mut r, 8 * 28, Some(36 * 2));
        let mat = material(&mut r);
        let a = TestEntity(&quad, &mat);
        let b = TestEntity(&cube, &mat);

        let items: [&dyn Drawable<HeadlessBackend>; 2] = [&a, &b];
        let outcome = frame(&mut r, &items);
        assert!(matches!(outcome, FrameOutcome::Presented { draws: 2, .. }));

        let record = r.backend.last_record().unwrap();
        let draws: Vec<_> = record
            .commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
            .collect();
        assert!(matches!(draws[0], RecordedCommand::Draw { vertex_count: 4 }));
        assert!(matches!(draws[1], RecordedCommand::DrawIndexed { index_count: 36 }));
        assert_eq!(record.names().iter().filter(|n| **n == "SetIndexBuffer").count(), 1);
    }

    #[test]
    fn hidden_window_skips_without_counting() {
        let mut r = rig();
        r.swap
            .resize(&mut r.backend, &mut r.sync, 1280, 720, true)
            .unwrap();
        assert_eq!(frame(&mut r, &[]), FrameOutcome::Skipped);
        assert_eq!(r.recorder.stats(), RecorderStats::default());
        assert_eq!(r.backend.stats().presents, 0);
    }

    #[test]
    fn slots_alternate_between_frames() {
        let mut r = rig();
        let slots: Vec<usize> = (0..4)
            .map(|_| match frame(&mut r, &[]) {
                FrameOutcome::Presented { slot, .. } => slot,
                FrameOutcome::Skipped => unreachable!(),
            })
            .collect();
        assert_ne!(slots[0], slots[1]);
        assert_eq!(slots[0], slots[2]);
        assert_eq!(slots[1], slots[3]);
    }
}
