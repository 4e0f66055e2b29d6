use std::time::Duration;

use crate::sync::SlotState;

/// Failures reported by a device backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },
    #[error("fence wait failed: {0}")]
    FenceWait(String),
    #[error("timed out after {waited:?} waiting for fence value {value}")]
    Timeout { value: u64, waited: Duration },
    #[error("presentation failed: {0}")]
    Presentation(String),
    #[error("fullscreen transition failed: {0}")]
    Fullscreen(String),
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
}

impl BackendError {
    pub fn creation(what: &'static str, reason: impl ToString) -> Self {
        Self::Creation {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the renderer core.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("device error: {0}")]
    Device(#[source] BackendError),
    #[error("fence wait failed: {0}")]
    FenceWait(#[source] BackendError),
    #[error("device did not reach fence value {value} within {timeout:?}")]
    DeviceTimeout { value: u64, timeout: Duration },
    #[error("presentation failed: {0}")]
    Presentation(#[source] BackendError),
    #[error("frame slot {slot} is {state:?}, expected Idle")]
    SlotBusy { slot: usize, state: SlotState },
    #[error("command allocator of slot {slot} still in flight (completed {completed} < {required})")]
    AllocatorInFlight {
        slot: usize,
        required: u64,
        completed: u64,
    },
    #[error("render target views are stale; framebuffers must be rebuilt first")]
    StaleFramebuffers,
    #[error("empty uploads are not allowed")]
    EmptyUpload,
}

impl RenderError {
    /// Device, fence-wait and presentation failures terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::Device(_)
                | RenderError::FenceWait(_)
                | RenderError::DeviceTimeout { .. }
                | RenderError::Presentation(_)
        )
    }
}

impl From<BackendError> for RenderError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Timeout { value, waited } => RenderError::DeviceTimeout {
                value,
                timeout: waited,
            },
            e @ BackendError::FenceWait(_) => RenderError::FenceWait(e),
            e @ BackendError::Presentation(_) => RenderError::Presentation(e),
            e => RenderError::Device(e),
        }
    }
}

/// Errors from loading renderer configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_categories() {
        let e: RenderError = BackendError::FenceWait("lost".into()).into();
        assert!(matches!(e, RenderError::FenceWait(_)));
        assert!(e.is_fatal());

        let e: RenderError = BackendError::Presentation("occluded".into()).into();
        assert!(matches!(e, RenderError::Presentation(_)));

        let e: RenderError = BackendError::creation("buffer", "out of memory").into();
        assert!(matches!(e, RenderError::Device(_)));
        assert!(e.to_string().contains("out of memory"));

        let e: RenderError = BackendError::Timeout {
            value: 7,
            waited: Duration::from_millis(5),
        }
        .into();
        assert!(matches!(e, RenderError::DeviceTimeout { value: 7, .. }));
    }

    #[test]
    fn invariant_violations_are_not_fatal_categories() {
        assert!(!RenderError::StaleFramebuffers.is_fatal());
        assert!(!RenderError::EmptyUpload.is_fatal());
    }
}
