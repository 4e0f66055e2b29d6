//! CPU/GPU frame synchronization.
//!
//! # Invariants
//! - One fence, one [`FrameSlot`] per back buffer.
//! - A slot's allocator is reset only once the completed fence value has
//!   reached the value signaled after that slot's last submission.
//! - Every wait is a full block on the fence; nothing is retried.

use std::time::Duration;

use serde::Serialize;

use crate::FRAME_COUNT;
use crate::backend::Backend;
use crate::error::{BackendError, RenderError};
use crate::swapchain::SwapChainManager;

/// Lifecycle of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Waiting,
}

/// Per-back-buffer command recording resources.
pub struct FrameSlot<B: Backend> {
    index: usize,
    /// Next value signaled for this slot; must be reached before the slot is reused.
    fence_value: u64,
    /// Value covering the slot's most recent submission.
    submitted_value: u64,
    state: SlotState,
    allocator: B::Allocator,
}

impl<B: Backend> FrameSlot<B> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn submitted_value(&self) -> u64 {
        self.submitted_value
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Counters for instrumentation and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub signals: u64,
    /// Blocking waits taken by `advance_frame` because the next slot was still in flight.
    pub frame_waits: u64,
    /// Full drains through `wait_for_device_idle`.
    pub idle_waits: u64,
}

/// Result of moving to the next frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceOutcome {
    pub submitted_value: u64,
    pub next_slot: usize,
    pub waited: bool,
}

pub struct FrameSynchronizer<B: Backend> {
    fence: B::Fence,
    slots: Vec<FrameSlot<B>>,
    wait_timeout: Option<Duration>,
    stats: SyncStats,
}

impl<B: Backend> FrameSynchronizer<B> {
    /// Creates one allocator per slot and the fence, seeded with the current slot's value.
    pub fn new(
        backend: &mut B,
        current: usize,
        wait_timeout: Option<Duration>,
    ) -> Result<Self, RenderError> {
        let mut slots = Vec::with_capacity(FRAME_COUNT);
        for index in 0..FRAME_COUNT {
            slots.push(FrameSlot {
                index,
                fence_value: 0,
                submitted_value: 0,
                state: SlotState::Idle,
                allocator: backend.create_command_allocator()?,
            });
        }

        let fence = backend.create_fence(slots[current].fence_value)?;
        slots[current].fence_value += 1;

        Ok(Self {
            fence,
            slots,
            wait_timeout,
            stats: SyncStats::default(),
        })
    }

    pub fn slots(&self) -> &[FrameSlot<B>] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &FrameSlot<B> {
        &self.slots[index]
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    pub fn completed_value(&self, backend: &mut B) -> u64 {
        backend.completed_value(&self.fence)
    }

    /// Resets the slot's allocator and marks it as recording.
    pub fn begin_recording(&mut self, backend: &mut B, current: usize) -> Result<(), RenderError> {
        let completed = backend.completed_value(&self.fence);
        let slot = &mut self.slots[current];
        if slot.state != SlotState::Idle {
            return Err(RenderError::SlotBusy {
                slot: current,
                state: slot.state,
            });
        }
        // Debug-layer check; a slot only turns Idle after its fence was reached.
        if completed < slot.submitted_value {
            return Err(RenderError::AllocatorInFlight {
                slot: current,
                required: slot.submitted_value,
                completed,
            });
        }
        backend.reset_allocator(&mut slot.allocator)?;
        slot.state = SlotState::Recording;
        Ok(())
    }

    pub fn allocator_mut(&mut self, current: usize) -> &mut B::Allocator {
        &mut self.slots[current].allocator
    }

    /// Records that the slot's command list went to the queue. The next
    /// signal for this slot covers it.
    pub fn mark_submitted(&mut self, current: usize) {
        let slot = &mut self.slots[current];
        slot.submitted_value = slot.fence_value;
        slot.state = SlotState::Submitted;
    }

    /// Signals the current slot's value and blocks until the device reaches it.
    pub fn wait_for_device_idle(&mut self, backend: &mut B, current: usize) -> Result<(), RenderError> {
        let value = self.slots[current].fence_value;
        backend.signal(&self.fence, value)?;
        self.stats.signals += 1;

        self.block_until(backend, value)?;
        self.stats.idle_waits += 1;

        self.slots[current].fence_value += 1;
        // The queue is in order, so everything submitted before the signal is done.
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        tracing::trace!(value, slot = current, "device idle");
        Ok(())
    }

    /// Signals the just-submitted slot, moves to the swap chain's new back
    /// buffer and waits if that slot's previous frame is still executing.
    pub fn advance_frame(
        &mut self,
        backend: &mut B,
        swap_chain: &mut SwapChainManager<B>,
    ) -> Result<AdvanceOutcome, RenderError> {
        let current = swap_chain.current_index();
        let submitted_value = self.slots[current].fence_value;
        backend.signal(&self.fence, submitted_value)?;
        self.stats.signals += 1;

        let next = swap_chain.requery_back_buffer_index(backend);
        let required = self.slots[next].fence_value;

        let mut waited = false;
        if backend.completed_value(&self.fence) < required {
            self.slots[next].state = SlotState::Waiting;
            tracing::trace!(slot = next, required, "waiting for frame slot");
            self.block_until(backend, required)?;
            self.stats.frame_waits += 1;
            waited = true;
        }

        let slot = &mut self.slots[next];
        slot.state = SlotState::Idle;
        slot.fence_value = submitted_value + 1;

        Ok(AdvanceOutcome {
            submitted_value,
            next_slot: next,
            waited,
        })
    }

    /// Sets every slot's fence value to the current slot's. Used after a
    /// resize, once the device has been drained.
    pub fn resynchronize(&mut self, current: usize) {
        let value = self.slots[current].fence_value;
        for slot in &mut self.slots {
            slot.fence_value = value;
        }
    }

    fn block_until(&self, backend: &mut B, value: u64) -> Result<(), RenderError> {
        backend
            .wait_for_value(&self.fence, value, self.wait_timeout)
            .map_err(|e| match e {
                BackendError::Timeout { value, .. } => RenderError::DeviceTimeout {
                    value,
                    timeout: self.wait_timeout.unwrap_or_default(),
                },
                e => RenderError::FenceWait(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommandList;
    use crate::headless::{GpuPace, HeadlessBackend};
    use leapbox_common::Extent2D;

    struct Rig {
        backend: HeadlessBackend,
        swap: SwapChainManager<HeadlessBackend>,
        sync: FrameSynchronizer<HeadlessBackend>,
    }

    fn rig(pace: GpuPace, timeout: Option<Duration>) -> Rig {
        let mut backend = HeadlessBackend::with_pace(Extent2D::new(1280, 720), pace);
        let swap = SwapChainManager::new(&backend);
        let sync = FrameSynchronizer::new(&mut backend, swap.current_index(), timeout).unwrap();
        Rig {
            backend,
            swap,
            sync,
        }
    }

    /// Records, executes and presents an empty list on the current slot.
    fn submit_frame(r: &mut Rig) -> AdvanceOutcome {
        let current = r.swap.current_index();
        r.sync.begin_recording(&mut r.backend, current).unwrap();
        let mut list = CommandList::new("test");
        list.close();
        r.backend
            .execute(r.sync.allocator_mut(current), &list)
            .unwrap();
        r.sync.mark_submitted(current);
        r.backend.present().unwrap();
        r.sync.advance_frame(&mut r.backend, &mut r.swap).unwrap()
    }

    #[test]
    fn allocator_reset_refused_while_in_flight() {
        let mut r = rig(GpuPace::Manual, None);
        let current = r.swap.current_index();
        r.sync.wait_for_device_idle(&mut r.backend, current).unwrap();
        let completed = r.sync.completed_value(&mut r.backend);
        r.sync.slots[current].submitted_value = completed + 5;

        let err = r.sync.begin_recording(&mut r.backend, current).unwrap_err();
        assert!(matches!(
            err,
            RenderError::AllocatorInFlight { slot, required, completed: c }
                if slot == current && required == completed + 5 && c == completed
        ));
        assert_eq!(r.sync.slot(current).state(), SlotState::Idle);
        assert_eq!(r.backend.stats().allocator_resets, 0);
    }

    #[test]
    fn fence_seeded_from_current_slot() {
        let r = rig(GpuPace::Immediate, None);
        let current = r.swap.current_index();
        assert_eq!(r.sync.slots().len(), FRAME_COUNT);
        assert_eq!(r.sync.slot(current).fence_value(), 1);
        assert_eq!(r.sync.slot(1 - current).fence_value(), 0);
    }

    #[test]
    fn wait_for_device_idle_increments_current_value() {
        let mut r = rig(GpuPace::Manual, None);
        let current = r.swap.current_index();
        r.sync.wait_for_device_idle(&mut r.backend, current).unwrap();

        assert_eq!(r.sync.completed_value(&mut r.backend), 1);
        assert_eq!(r.sync.slot(current).fence_value(), 2);
        assert_eq!(r.sync.stats().idle_waits, 1);
        assert!(r.sync.slots().iter().all(|s| s.state() == SlotState::Idle));
    }

    #[test]
    fn fast_device_never_blocks_frames() {
        let mut r = rig(GpuPace::Immediate, None);
        let current = r.swap.current_index();
        r.sync.wait_for_device_idle(&mut r.backend, current).unwrap();

        for _ in 0..6 {
            let outcome = submit_frame(&mut r);
            assert!(!outcome.waited);
        }
        assert_eq!(r.sync.stats().frame_waits, 0);
    }

    #[test]
    fn lagging_device_blocks_exactly_when_next_slot_in_flight() {
        let mut r = rig(GpuPace::Manual, None);
        let start = r.swap.current_index();
        r.sync.wait_for_device_idle(&mut r.backend, start).unwrap();

        // Frame 1: the other slot has never been submitted.
        let first = submit_frame(&mut r);
        assert_eq!(first.submitted_value, 2);
        assert_eq!(first.next_slot, 1 - start);
        assert!(!first.waited);
        assert_eq!(r.sync.completed_value(&mut r.backend), 1);

        // Frame 2: we are back on the start slot whose frame has not executed.
        let second = submit_frame(&mut r);
        assert_eq!(second.next_slot, start);
        assert!(second.waited);
        assert_eq!(r.sync.completed_value(&mut r.backend), 2);
        assert_eq!(r.sync.slot(start).fence_value(), second.submitted_value + 1);

        // Let the device catch up completely: no wait on the following frame.
        r.backend.flush_gpu();
        let third = submit_frame(&mut r);
        assert!(!third.waited);
        assert_eq!(r.sync.stats().frame_waits, 1);
    }

    #[test]
    fn begin_recording_rejects_busy_slot() {
        let mut r = rig(GpuPace::Immediate, None);
        let current = r.swap.current_index();
        r.sync.begin_recording(&mut r.backend, current).unwrap();
        let err = r.sync.begin_recording(&mut r.backend, current).unwrap_err();
        assert!(matches!(
            err,
            RenderError::SlotBusy {
                state: SlotState::Recording,
                ..
            }
        ));
    }

    #[test]
    fn resynchronize_copies_current_value() {
        let mut r = rig(GpuPace::Immediate, None);
        let current = r.swap.current_index();
        r.sync.wait_for_device_idle(&mut r.backend, current).unwrap();
        r.sync.resynchronize(current);
        let value = r.sync.slot(current).fence_value();
        assert!(r.sync.slots().iter().all(|s| s.fence_value() == value));
    }

    #[test]
    fn hung_device_times_out_when_bounded() {
        let mut r = rig(GpuPace::Hung, Some(Duration::from_millis(10)));
        let current = r.swap.current_index();
        let err = r
            .sync
            .wait_for_device_idle(&mut r.backend, current)
            .unwrap_err();
        assert!(matches!(err, RenderError::DeviceTimeout { value: 1, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn hung_device_fails_unbounded_wait() {
        let mut r = rig(GpuPace::Hung, None);
        let current = r.swap.current_index();
        let err = r
            .sync
            .wait_for_device_idle(&mut r.backend, current)
            .unwrap_err();
        assert!(matches!(err, RenderError::FenceWait(_)));
    }
}
