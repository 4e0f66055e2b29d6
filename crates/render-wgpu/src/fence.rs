//! Fence emulation on top of queue completion callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use leapbox_render::BackendError;

/// Polling interval for bounded waits.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Monotonic completion counter advanced when the queue finishes the work
/// submitted ahead of each signal.
pub struct WgpuFence {
    completed: Arc<AtomicU64>,
}

impl WgpuFence {
    pub(crate) fn new(initial_value: u64) -> Self {
        Self {
            completed: Arc::new(AtomicU64::new(initial_value)),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Arranges for the fence to reach `value` once everything submitted so far is done.
    pub(crate) fn signal(&self, queue: &wgpu::Queue, value: u64) {
        let completed = Arc::clone(&self.completed);
        queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
    }

    pub(crate) fn wait(
        &self,
        device: &wgpu::Device,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        if self.completed() >= value {
            return Ok(());
        }
        match timeout {
            None => {
                let _ = device.poll(wgpu::Maintain::Wait);
                if self.completed() >= value {
                    Ok(())
                } else {
                    Err(BackendError::FenceWait(format!(
                        "queue drained but fence stopped at {} (wanted {value})",
                        self.completed()
                    )))
                }
            }
            Some(limit) => {
                let start = Instant::now();
                loop {
                    let _ = device.poll(wgpu::Maintain::Poll);
                    if self.completed() >= value {
                        return Ok(());
                    }
                    let waited = start.elapsed();
                    if waited >= limit {
                        return Err(BackendError::Timeout { value, waited });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}
