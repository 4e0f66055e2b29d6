//! In-process simulated device.
//!
//! [`HeadlessBackend`] models a GPU timeline: executed command lists and fence
//! signals are queued and retired in submission order, either right away or
//! only when the CPU blocks on a fence, depending on the [`GpuPace`]. Buffer
//! copies move real bytes, so uploads can be read back.
//!
//! The backend validates usage the way a debug layer would and reports
//! violations as [`BackendError::InvalidUsage`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use leapbox_common::{ClearColor, Extent2D};
use serde::Serialize;

use crate::backend::{
    Backend, BarrierTarget, BufferUsage, Command, CommandList, IndexFormat, PipelineDescription,
    PrimitiveTopology, ResourceState, ScissorRect, Viewport,
};
use crate::error::BackendError;

/// Number of executed command lists kept for inspection.
const RECORD_HISTORY: usize = 64;

/// How the simulated device progresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GpuPace {
    /// Work retires as soon as it is queued.
    #[default]
    Immediate,
    /// Work retires only while the CPU blocks on a fence, or through
    /// [`HeadlessBackend::step_gpu`] / [`HeadlessBackend::flush_gpu`].
    Manual,
    /// Nothing ever retires.
    Hung,
}

type Bytes = Arc<Mutex<Vec<u8>>>;

pub struct HeadlessBuffer {
    id: u64,
    usage: BufferUsage,
    size: u64,
    contents: Bytes,
    _live: Arc<()>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

pub struct HeadlessPipeline {
    id: u64,
    label: String,
}

impl HeadlessPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

pub struct HeadlessRootSignature {
    _id: u64,
}

pub struct HeadlessAllocator {
    /// Sequence number of the last list executed from this allocator.
    in_flight: Option<u64>,
}

pub struct HeadlessFence {
    value: Arc<AtomicU64>,
}

pub struct HeadlessRenderTarget {
    index: usize,
    generation: u64,
    _live: Arc<()>,
}

impl HeadlessRenderTarget {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedTarget {
    BackBuffer(usize),
    Buffer(u64),
}

/// Owned copy of an executed [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    SetRootSignature,
    SetDescriptorTable,
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    Transition {
        target: RecordedTarget,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTarget {
        back_buffer: usize,
    },
    ClearRenderTarget {
        back_buffer: usize,
        color: ClearColor,
    },
    SetPipelineState {
        pipeline: u64,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffer {
        buffer: u64,
        stride: u32,
        size: u64,
    },
    SetIndexBuffer {
        buffer: u64,
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
        src: u64,
        dst: u64,
        size: u64,
    },
}

impl RecordedCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RecordedCommand::SetRootSignature => "SetRootSignature",
            RecordedCommand::SetDescriptorTable => "SetDescriptorTable",
            RecordedCommand::SetViewport(_) => "SetViewport",
            RecordedCommand::SetScissorRect(_) => "SetScissorRect",
            RecordedCommand::Transition { .. } => "Transition",
            RecordedCommand::SetRenderTarget { .. } => "SetRenderTarget",
            RecordedCommand::ClearRenderTarget { .. } => "ClearRenderTarget",
            RecordedCommand::SetPipelineState { .. } => "SetPipelineState",
            RecordedCommand::SetPrimitiveTopology(_) => "SetPrimitiveTopology",
            RecordedCommand::SetVertexBuffer { .. } => "SetVertexBuffer",
            RecordedCommand::SetIndexBuffer { .. } => "SetIndexBuffer",
            RecordedCommand::Draw { .. } => "Draw",
            RecordedCommand::DrawIndexed { .. } => "DrawIndexed",
            RecordedCommand::CopyBuffer { .. } => "CopyBuffer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub label: &'static str,
    pub seq: u64,
    pub commands: Vec<RecordedCommand>,
}

impl CommandRecord {
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(RecordedCommand::name).collect()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeadlessStats {
    pub executed_lists: u64,
    pub signals: u64,
    pub fence_waits: u64,
    pub presents: u64,
    pub resizes: u64,
    pub render_targets_created: u64,
    pub buffers_created: u64,
    pub allocator_resets: u64,
}

struct PendingCopy {
    src: Bytes,
    dst: Bytes,
    len: usize,
}

enum QueueOp {
    Execute { seq: u64, copies: Vec<PendingCopy> },
    Signal { fence: Arc<AtomicU64>, value: u64 },
}

pub struct HeadlessBackend {
    pace: GpuPace,
    extent: Extent2D,
    buffer_count: usize,
    back_buffer_index: usize,
    /// Bumped on every resize; render targets from older generations are stale.
    generation: u64,
    back_buffer_states: Vec<ResourceState>,
    fullscreen: bool,
    fail_fullscreen: bool,
    queue: VecDeque<QueueOp>,
    next_seq: u64,
    completed_seq: u64,
    next_id: u64,
    buffers_live: Arc<()>,
    targets_live: Arc<()>,
    records: VecDeque<CommandRecord>,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    pub fn new(extent: Extent2D) -> Self {
        Self::with_pace(extent, GpuPace::Immediate)
    }

    pub fn with_pace(extent: Extent2D, pace: GpuPace) -> Self {
        Self {
            pace,
            extent,
            buffer_count: crate::FRAME_COUNT,
            back_buffer_index: 0,
            generation: 0,
            back_buffer_states: vec![ResourceState::Present; crate::FRAME_COUNT],
            fullscreen: false,
            fail_fullscreen: false,
            queue: VecDeque::new(),
            next_seq: 1,
            completed_seq: 0,
            next_id: 1,
            buffers_live: Arc::new(()),
            targets_live: Arc::new(()),
            records: VecDeque::new(),
            stats: HeadlessStats::default(),
        }
    }

    pub fn pace(&self) -> GpuPace {
        self.pace
    }

    pub fn set_pace(&mut self, pace: GpuPace) {
        self.pace = pace;
        if pace == GpuPace::Immediate {
            self.flush_gpu();
        }
    }

    /// Makes every following fullscreen transition fail until cleared.
    pub fn set_fullscreen_failure(&mut self, fail: bool) {
        self.fail_fullscreen = fail;
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    pub fn records(&self) -> impl Iterator<Item = &CommandRecord> {
        self.records.iter()
    }

    pub fn last_record(&self) -> Option<&CommandRecord> {
        self.records.back()
    }

    /// Queue operations not yet retired by the device.
    pub fn pending_ops(&self) -> usize {
        self.queue.len()
    }

    pub fn live_buffers(&self) -> usize {
        Arc::strong_count(&self.buffers_live) - 1
    }

    pub fn live_render_targets(&self) -> usize {
        Arc::strong_count(&self.targets_live) - 1
    }

    /// Retires the oldest queued operation. Returns false when the queue is empty.
    pub fn step_gpu(&mut self) -> bool {
        let Some(op) = self.queue.pop_front() else {
            return false;
        };
        match op {
            QueueOp::Execute { seq, copies } => {
                for copy in copies {
                    let bytes = {
                        let src = copy.src.lock().unwrap_or_else(PoisonError::into_inner);
                        src[..copy.len].to_vec()
                    };
                    let mut dst = copy.dst.lock().unwrap_or_else(PoisonError::into_inner);
                    dst[..copy.len].copy_from_slice(&bytes);
                }
                self.completed_seq = seq;
            }
            QueueOp::Signal { fence, value } => {
                fence.fetch_max(value, Ordering::AcqRel);
            }
        }
        true
    }

    pub fn flush_gpu(&mut self) {
        while self.step_gpu() {}
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn enqueue(&mut self, op: QueueOp) {
        self.queue.push_back(op);
        if self.pace == GpuPace::Immediate {
            self.flush_gpu();
        }
    }

    fn check_back_buffer(&self, target: &HeadlessRenderTarget) -> Result<(), BackendError> {
        if target.generation != self.generation {
            return Err(BackendError::InvalidUsage(format!(
                "render target {} is from before the last resize",
                target.index
            )));
        }
        if target.index != self.back_buffer_index {
            return Err(BackendError::InvalidUsage(format!(
                "render target {} is not the current back buffer ({})",
                target.index, self.back_buffer_index
            )));
        }
        Ok(())
    }
}

impl Backend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Pipeline = HeadlessPipeline;
    type RootSignature = HeadlessRootSignature;
    type Allocator = HeadlessAllocator;
    type Fence = HeadlessFence;
    type RenderTarget = HeadlessRenderTarget;

    fn create_root_signature(&mut self) -> Result<HeadlessRootSignature, BackendError> {
        Ok(HeadlessRootSignature { _id: self.next_id() })
    }

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineDescription,
        _root: &HeadlessRootSignature,
    ) -> Result<HeadlessPipeline, BackendError> {
        desc.validate()?;
        Ok(HeadlessPipeline {
            id: self.next_id(),
            label: desc.label.clone(),
        })
    }

    fn create_command_allocator(&mut self) -> Result<HeadlessAllocator, BackendError> {
        Ok(HeadlessAllocator { in_flight: None })
    }

    fn create_fence(&mut self, initial_value: u64) -> Result<HeadlessFence, BackendError> {
        Ok(HeadlessFence {
            value: Arc::new(AtomicU64::new(initial_value)),
        })
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<HeadlessBuffer, BackendError> {
        if size == 0 {
            return Err(BackendError::InvalidUsage("zero-sized buffer".into()));
        }
        let len = usize::try_from(size).map_err(|e| BackendError::creation("buffer", e))?;
        self.stats.buffers_created += 1;
        Ok(HeadlessBuffer {
            id: self.next_id(),
            usage,
            size,
            contents: Arc::new(Mutex::new(vec![0; len])),
            _live: Arc::clone(&self.buffers_live),
        })
    }

    fn write_staging(&mut self, staging: &HeadlessBuffer, bytes: &[u8]) -> Result<(), BackendError> {
        if staging.usage != BufferUsage::UploadStaging {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} is not host-visible",
                staging.id
            )));
        }
        if bytes.len() as u64 > staging.size {
            return Err(BackendError::InvalidUsage(format!(
                "{} bytes do not fit staging buffer of {}",
                bytes.len(),
                staging.size
            )));
        }
        let mut contents = staging.contents.lock().unwrap_or_else(PoisonError::into_inner);
        contents[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &HeadlessBuffer, size: u64) -> Result<Vec<u8>, BackendError> {
        let contents = buffer.contents.lock().unwrap_or_else(PoisonError::into_inner);
        let len = (size.min(buffer.size)) as usize;
        Ok(contents[..len].to_vec())
    }

    fn reset_allocator(&mut self, allocator: &mut HeadlessAllocator) -> Result<(), BackendError> {
        if let Some(seq) = allocator.in_flight {
            if seq > self.completed_seq {
                return Err(BackendError::InvalidUsage(format!(
                    "allocator reset while command list {seq} is still executing"
                )));
            }
        }
        allocator.in_flight = None;
        self.stats.allocator_resets += 1;
        Ok(())
    }

    fn execute(
        &mut self,
        allocator: &mut HeadlessAllocator,
        list: &CommandList<'_, Self>,
    ) -> Result<(), BackendError> {
        if !list.is_closed() {
            return Err(BackendError::InvalidUsage(format!(
                "command list '{}' executed before it was closed",
                list.label()
            )));
        }

        let mut states = self.back_buffer_states.clone();
        let mut commands = Vec::with_capacity(list.len());
        let mut copies = Vec::new();
        let mut pipeline_bound = false;
        let mut index_bound = false;

        for command in list.commands() {
            let recorded = match command {
                Command::SetRootSignature(_) => RecordedCommand::SetRootSignature,
                Command::SetDescriptorTable(_) => RecordedCommand::SetDescriptorTable,
                Command::SetViewport(v) => RecordedCommand::SetViewport(*v),
                Command::SetScissorRect(s) => RecordedCommand::SetScissorRect(*s),
                Command::Transition {
                    target,
                    before,
                    after,
                } => {
                    let target = match target {
                        BarrierTarget::BackBuffer(rt) => {
                            self.check_back_buffer(rt)?;
                            if states[rt.index] != *before {
                                return Err(BackendError::InvalidUsage(format!(
                                    "back buffer {} is {:?}, barrier expects {:?}",
                                    rt.index, states[rt.index], before
                                )));
                            }
                            states[rt.index] = *after;
                            RecordedTarget::BackBuffer(rt.index)
                        }
                        BarrierTarget::Buffer(buffer) => RecordedTarget::Buffer(buffer.id),
                    };
                    RecordedCommand::Transition {
                        target,
                        before: *before,
                        after: *after,
                    }
                }
                Command::SetRenderTarget(rt) | Command::ClearRenderTarget { target: rt, .. } => {
                    self.check_back_buffer(rt)?;
                    if states[rt.index] != ResourceState::RenderTarget {
                        return Err(BackendError::InvalidUsage(format!(
                            "back buffer {} used as render target while {:?}",
                            rt.index, states[rt.index]
                        )));
                    }
                    match command {
                        Command::ClearRenderTarget { color, .. } => {
                            RecordedCommand::ClearRenderTarget {
                                back_buffer: rt.index,
                                color: *color,
                            }
                        }
                        _ => RecordedCommand::SetRenderTarget {
                            back_buffer: rt.index,
                        },
                    }
                }
                Command::SetPipelineState(p) => {
                    pipeline_bound = true;
                    RecordedCommand::SetPipelineState { pipeline: p.id }
                }
                Command::SetPrimitiveTopology(t) => RecordedCommand::SetPrimitiveTopology(*t),
                Command::SetVertexBuffer {
                    buffer,
                    stride,
                    size,
                } => RecordedCommand::SetVertexBuffer {
                    buffer: buffer.id,
                    stride: *stride,
                    size: *size,
                },
                Command::SetIndexBuffer {
                    buffer,
                    format,
                    size,
                } => {
                    index_bound = true;
                    RecordedCommand::SetIndexBuffer {
                        buffer: buffer.id,
                        format: *format,
                        size: *size,
                    }
                }
                Command::Draw { vertex_count } => {
                    if !pipeline_bound {
                        return Err(BackendError::InvalidUsage("draw without a pipeline".into()));
                    }
                    RecordedCommand::Draw {
                        vertex_count: *vertex_count,
                    }
                }
                Command::DrawIndexed { index_count } => {
                    if !pipeline_bound || !index_bound {
                        return Err(BackendError::InvalidUsage(
                            "indexed draw without a pipeline and index buffer".into(),
                        ));
                    }
                    RecordedCommand::DrawIndexed {
                        index_count: *index_count,
                    }
                }
                Command::CopyBuffer { src, dst, size } => {
                    if src.usage != BufferUsage::UploadStaging {
                        return Err(BackendError::InvalidUsage(format!(
                            "copy source {} is not a staging buffer",
                            src.id
                        )));
                    }
                    if *size > src.size || *size > dst.size {
                        return Err(BackendError::InvalidUsage(format!(
                            "copy of {size} bytes overruns buffer {} or {}",
                            src.id, dst.id
                        )));
                    }
                    copies.push(PendingCopy {
                        src: Arc::clone(&src.contents),
                        dst: Arc::clone(&dst.contents),
                        len: *size as usize,
                    });
                    RecordedCommand::CopyBuffer {
                        src: src.id,
                        dst: dst.id,
                        size: *size,
                    }
                }
            };
            commands.push(recorded);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.back_buffer_states = states;
        allocator.in_flight = Some(seq);
        self.stats.executed_lists += 1;

        self.records.push_back(CommandRecord {
            label: list.label(),
            seq,
            commands,
        });
        if self.records.len() > RECORD_HISTORY {
            self.records.pop_front();
        }

        self.enqueue(QueueOp::Execute { seq, copies });
        Ok(())
    }

    fn signal(&mut self, fence: &HeadlessFence, value: u64) -> Result<(), BackendError> {
        self.stats.signals += 1;
        self.enqueue(QueueOp::Signal {
            fence: Arc::clone(&fence.value),
            value,
        });
        Ok(())
    }

    fn completed_value(&mut self, fence: &HeadlessFence) -> u64 {
        fence.value.load(Ordering::Acquire)
    }

    fn wait_for_value(
        &mut self,
        fence: &HeadlessFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.stats.fence_waits += 1;
        loop {
            if fence.value.load(Ordering::Acquire) >= value {
                return Ok(());
            }
            match self.pace {
                GpuPace::Hung => {
                    return Err(match timeout {
                        Some(waited) => BackendError::Timeout { value, waited },
                        None => BackendError::FenceWait(format!(
                            "device stopped responding before fence value {value}"
                        )),
                    });
                }
                GpuPace::Immediate | GpuPace::Manual => {
                    if !self.step_gpu() {
                        return Err(BackendError::FenceWait(format!(
                            "fence value {value} was never signaled"
                        )));
                    }
                }
            }
        }
    }

    fn swap_chain_extent(&self) -> Extent2D {
        self.extent
    }

    fn current_back_buffer_index(&self) -> usize {
        self.back_buffer_index
    }

    fn resize_swap_chain(
        &mut self,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        if self.live_render_targets() > 0 {
            return Err(BackendError::InvalidUsage(format!(
                "{} render target views still reference the swap chain",
                self.live_render_targets()
            )));
        }
        if buffer_count == 0 {
            return Err(BackendError::InvalidUsage("swap chain needs buffers".into()));
        }
        self.extent = Extent2D::new(width, height);
        self.buffer_count = buffer_count;
        self.back_buffer_index = 0;
        self.generation += 1;
        self.back_buffer_states = vec![ResourceState::Present; buffer_count];
        self.stats.resizes += 1;
        Ok(())
    }

    fn create_render_target(&mut self, index: usize) -> Result<HeadlessRenderTarget, BackendError> {
        if index >= self.buffer_count {
            return Err(BackendError::InvalidUsage(format!(
                "back buffer {index} does not exist"
            )));
        }
        self.stats.render_targets_created += 1;
        Ok(HeadlessRenderTarget {
            index,
            generation: self.generation,
            _live: Arc::clone(&self.targets_live),
        })
    }

    fn present(&mut self) -> Result<(), BackendError> {
        let index = self.back_buffer_index;
        if self.back_buffer_states[index] != ResourceState::Present {
            return Err(BackendError::Presentation(format!(
                "back buffer {index} presented while {:?}",
                self.back_buffer_states[index]
            )));
        }
        self.stats.presents += 1;
        self.back_buffer_index = (index + 1) % self.buffer_count;
        Ok(())
    }

    fn fullscreen_state(&self) -> Result<bool, BackendError> {
        Ok(self.fullscreen)
    }

    fn set_fullscreen_state(&mut self, fullscreen: bool) -> Result<(), BackendError> {
        if self.fail_fullscreen {
            return Err(BackendError::Fullscreen("output is not available".into()));
        }
        self.fullscreen = fullscreen;
        Ok(())
    }
}
