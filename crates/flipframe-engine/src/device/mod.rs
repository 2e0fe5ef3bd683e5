//! GPU device, presentation and frame synchronization.
//!
//! This module is responsible for:
//! - selecting a hardware adapter and creating the Device/Queue
//! - creating the swap chain and the render-target-view heap
//! - building one frame object per swap-chain buffer
//! - recording the per-frame barrier/clear sequence and fencing its reuse

mod adapter;
mod error;
mod fence;
mod frame;
mod gpu;
mod heap;
mod init;
mod recorder;
mod state;
mod surface;

pub use adapter::select_hardware_adapter;
pub use error::{ErrorAction, GpuError};
pub use fence::FenceSync;
pub use frame::{FrameObject, FrameTable};
pub use gpu::{FrameReport, Gpu};
pub use heap::{create_heap, DescriptorHeap};
pub use init::GpuInit;
pub use recorder::{CommandRecorder, RecorderState};
pub use state::{TrackedState, Transition};
pub use surface::{Surface, SurfaceTarget};
