use thiserror::Error;

use crate::hal::{FeatureLevel, HeapKind, ResourceState};

/// Errors surfaced by the GPU layer.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum GpuError {
    /// The platform cannot create a device at the required feature level.
    #[error("platform does not support feature level {required}")]
    UnsupportedPlatform { required: FeatureLevel },

    /// Enumeration found no hardware adapter supporting the feature level.
    #[error("no hardware adapter supports feature level {required} ({enumerated} adapters enumerated)")]
    NoHardwareAdapter {
        required: FeatureLevel,
        enumerated: u32,
    },

    /// The device was removed or reset after creation.
    #[error("GPU device lost: {reason}")]
    DeviceLost { reason: String },

    /// A descriptor allocation would exceed the heap capacity.
    #[error("{kind} descriptor heap exhausted (capacity {capacity})")]
    HeapExhausted { kind: HeapKind, capacity: u32 },

    /// Presentation surface with a zero-sized client area.
    #[error("degenerate presentation surface {width}x{height}; both dimensions must be positive")]
    DegenerateSurface { width: u32, height: u32 },

    /// The window handle is not a kind this backend can present to.
    #[error("unsupported window handle: {0}")]
    UnsupportedWindowHandle(String),

    #[error("invalid GPU configuration: {0}")]
    InvalidConfig(String),

    /// A barrier was requested from a state the resource is not in.
    #[error("resource is in {actual} state, barrier expected {expected}")]
    StateMismatch {
        expected: ResourceState,
        actual: ResourceState,
    },

    /// A barrier whose before and after states are identical.
    #[error("redundant transition to {0}")]
    RedundantTransition(ResourceState),

    /// A command-list operation issued in the wrong recorder state.
    #[error("cannot {op} a command list that is {state}")]
    RecorderState { op: &'static str, state: &'static str },

    /// A wait on a fence value that was never signaled would block forever.
    #[error("fence value {requested} was never signaled (last signaled {last_signaled})")]
    FenceNotSignaled { requested: u64, last_signaled: u64 },

    /// A frame's allocator was about to be reused before the GPU reached
    /// the fence value of its last submission.
    #[error("frame still in flight: fence {fence_value} pending, GPU completed {completed}")]
    FrameInFlight { fence_value: u64, completed: u64 },

    /// Any other failed native call.
    #[error("{call} failed: {message}")]
    Native { call: &'static str, message: String },
}

/// What the owner of a `Gpu` should do after an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorAction {
    /// Device lost; tear down every GPU object and build a new `Gpu`.
    Recreate,
    /// Not recoverable by re-initialization; terminate.
    Fatal,
}

impl GpuError {
    pub fn native(call: &'static str, message: impl Into<String>) -> Self {
        GpuError::Native {
            call,
            message: message.into(),
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, GpuError::DeviceLost { .. })
    }

    /// Classifies the error for the owning application.
    pub fn action(&self) -> ErrorAction {
        match self {
            GpuError::DeviceLost { .. } => ErrorAction::Recreate,
            _ => ErrorAction::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_loss_is_recoverable() {
        let lost = GpuError::DeviceLost {
            reason: "hung".into(),
        };
        assert_eq!(lost.action(), ErrorAction::Recreate);
        assert!(lost.is_device_lost());

        let exhausted = GpuError::HeapExhausted {
            kind: HeapKind::RenderTargetView,
            capacity: 3,
        };
        assert_eq!(exhausted.action(), ErrorAction::Fatal);
    }

    #[test]
    fn messages_name_the_problem() {
        let e = GpuError::DegenerateSurface {
            width: 0,
            height: 600,
        };
        assert!(e.to_string().contains("0x600"));

        let e = GpuError::UnsupportedPlatform {
            required: FeatureLevel::Level12_0,
        };
        assert!(e.to_string().contains("12.0"));
    }
}
