//! Blocking staging-buffer uploads.
//!
//! Every upload drains the device before it starts and again after its copy
//! has been submitted, so the staging buffer can be dropped on return and the
//! destination is immediately usable by the next frame.

use serde::Serialize;

use crate::backend::{Backend, BarrierTarget, BufferUsage, Command, CommandList, ResourceState};
use crate::error::RenderError;
use crate::resource::GpuBuffer;
use crate::swapchain::SwapChainManager;
use crate::sync::FrameSynchronizer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub uploads: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct UploadPipeline {
    stats: UploadStats,
}

impl UploadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Copies `bytes` into a new device-local buffer of the given usage.
    pub fn upload<B: Backend>(
        &mut self,
        backend: &mut B,
        sync: &mut FrameSynchronizer<B>,
        swap_chain: &SwapChainManager<B>,
        bytes: &[u8],
        usage: BufferUsage,
    ) -> Result<GpuBuffer<B>, RenderError> {
        if bytes.is_empty() {
            return Err(RenderError::EmptyUpload);
        }
        debug_assert_ne!(usage, BufferUsage::UploadStaging);

        let size = bytes.len() as u64;
        let _span = tracing::debug_span!("upload", ?usage, size).entered();
        let current = swap_chain.current_index();

        sync.wait_for_device_idle(backend, current)?;
        sync.begin_recording(backend, current)?;

        let destination = backend.create_buffer(size, usage)?;
        let staging = backend.create_buffer(size, BufferUsage::UploadStaging)?;
        backend.write_staging(&staging, bytes)?;

        let mut list = CommandList::new("upload");
        list.record(Command::CopyBuffer {
            src: &staging,
            dst: &destination,
            size,
        });
        list.record(Command::Transition {
            target: BarrierTarget::Buffer(&destination),
            before: ResourceState::CopyDest,
            after: usage.resting_state(),
        });
        list.close();

        backend.execute(sync.allocator_mut(current), &list)?;
        sync.mark_submitted(current);
        drop(list);

        sync.wait_for_device_idle(backend, current)?;
        drop(staging);

        self.stats.uploads += 1;
        self.stats.bytes += size;
        tracing::debug!(size, "upload complete");

        Ok(GpuBuffer::new(destination, size, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{GpuPace, HeadlessBackend, RecordedCommand, RecordedTarget};
    use leapbox_common::Extent2D;

    struct Rig {
        backend: HeadlessBackend,
        swap: SwapChainManager<HeadlessBackend>,
        sync: FrameSynchronizer<HeadlessBackend>,
        uploads: UploadPipeline,
    }

    fn rig(pace: GpuPace) -> Rig {
        let mut backend = HeadlessBackend::with_pace(Extent2D::new(1280, 720), pace);
        let swap = SwapChainManager::new(&backend);
        let mut sync = FrameSynchronizer::new(&mut backend, swap.current_index(), None).unwrap();
        sync.wait_for_device_idle(&mut backend, swap.current_index())
            .unwrap();
        Rig {
            backend,
            swap,
            sync,
            uploads: UploadPipeline::new(),
        }
    }

    fn upload(r: &mut Rig, bytes: &[u8], usage: BufferUsage) -> GpuBuffer<HeadlessBackend> {
        r.uploads
            .upload(&mut r.backend, &mut r.sync, &r.swap, bytes, usage)
            .unwrap()
    }

    #[test]
    fn vertex_upload_round_trips() {
        let mut r = rig(GpuPace::Manual);
        let bytes: Vec<u8> = (0..144u8).collect();
        let buffer = upload(&mut r, &bytes, BufferUsage::VertexOrConstant);

        assert_eq!(buffer.size(), 144);
        assert_eq!(buffer.usage(), BufferUsage::VertexOrConstant);
        let read = r.backend.read_buffer(buffer.raw(), buffer.size()).unwrap();
        assert_eq!(read, bytes);
    }

    #[test]
    fn upload_drains_device_and_releases_staging() {
        let mut r = rig(GpuPace::Manual);
        let idle_before = r.sync.stats().idle_waits;
        let buffer = upload(&mut r, &[1, 2, 3, 4], BufferUsage::Index);

        assert_eq!(r.sync.stats().idle_waits, idle_before + 2);
        assert_eq!(r.backend.pending_ops(), 0);
        // Only the destination is still alive.
        assert_eq!(r.backend.live_buffers(), 1);
        drop(buffer);
        assert_eq!(r.backend.live_buffers(), 0);
    }

    #[test]
    fn upload_records_copy_then_transition() {
        let mut r = rig(GpuPace::Immediate);
        let buffer = upload(&mut r, &[0u8; 72], BufferUsage::Index);

        let record = r.backend.last_record().unwrap();
        assert_eq!(record.label, "upload");
        assert_eq!(record.names(), vec!["CopyBuffer", "Transition"]);
        match &record.commands[1] {
            RecordedCommand::Transition {
                target: RecordedTarget::Buffer(id),
                before,
                after,
            } => {
                assert_eq!(*id, buffer.raw().id());
                assert_eq!(*before, ResourceState::CopyDest);
                assert_eq!(*after, ResourceState::IndexBuffer);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn empty_upload_is_rejected() {
        let mut r = rig(GpuPace::Immediate);
        let err = r
            .uploads
            .upload(&mut r.backend, &mut r.sync, &r.swap, &[], BufferUsage::Index)
            .unwrap_err();
        assert!(matches!(err, RenderError::EmptyUpload));
        assert_eq!(r.uploads.stats().uploads, 0);
    }

    #[test]
    fn stats_accumulate() {
        let mut r = rig(GpuPace::Immediate);
        upload(&mut r, &[0u8; 28], BufferUsage::VertexOrConstant);
        upload(&mut r, &[0u8; 12], BufferUsage::Index);
        assert_eq!(
            r.uploads.stats(),
            UploadStats {
                uploads: 2,
                bytes: 40
            }
        );
    }
}
