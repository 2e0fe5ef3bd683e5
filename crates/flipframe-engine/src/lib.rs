//! Flipframe engine crate.
//!
//! Owns the GPU substrate beneath a renderer: adapter and device selection,
//! a double-buffered swap chain, descriptor-backed render target views,
//! per-frame command recording and fence-based CPU/GPU synchronization.

pub mod device;
pub mod hal;
pub mod logging;

pub use device::{ErrorAction, FrameReport, Gpu, GpuError, GpuInit, SurfaceTarget};
pub use hal::{Backend, ClearColor};
