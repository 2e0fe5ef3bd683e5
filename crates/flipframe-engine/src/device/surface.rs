use raw_window_handle::RawWindowHandle;

use super::{GpuError, GpuInit};
use crate::hal::{Backend, Format, SwapChainDesc};

/// Native window the swap chain presents into.
///
/// `width`/`height` are the client area in physical pixels.
#[derive(Debug, Copy, Clone)]
pub struct SurfaceTarget {
    pub window: RawWindowHandle,
    pub width: u32,
    pub height: u32,
}

impl SurfaceTarget {
    pub fn new(window: RawWindowHandle, width: u32, height: u32) -> Self {
        Self {
            window,
            width,
            height,
        }
    }
}

/// Double (or more) buffered swap chain bound to a window.
pub struct Surface<B: Backend> {
    raw: B::SwapChain,
    desc: SwapChainDesc,
}

impl<B: Backend> Surface<B> {
    /// Creates the swap chain on `queue`.
    ///
    /// A zero-sized client area is rejected before the driver is called.
    pub fn create(
        backend: &B,
        queue: &B::Queue,
        target: SurfaceTarget,
        init: &GpuInit,
    ) -> Result<Self, GpuError> {
        if target.width == 0 || target.height == 0 {
            return Err(GpuError::DegenerateSurface {
                width: target.width,
                height: target.height,
            });
        }

        let desc = SwapChainDesc {
            window: target.window,
            width: target.width,
            height: target.height,
            buffer_count: init.buffer_count,
            format: init.surface_format,
        };
        let raw = backend.create_swap_chain(queue, &desc)?;

        log::debug!(
            "swap chain {}x{} {:?}, {} buffers",
            desc.width,
            desc.height,
            desc.format,
            desc.buffer_count
        );

        Ok(Self { raw, desc })
    }

    pub fn raw(&self) -> &B::SwapChain {
        &self.raw
    }

    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    /// Client size the swap chain was created with.
    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    /// Storage format of the buffers.
    pub fn format(&self) -> Format {
        self.desc.format
    }

    /// Format render target views are created with.
    pub fn view_format(&self) -> Format {
        self.desc.format.srgb()
    }

    /// Index of the buffer that is safe to render into next.
    pub fn current_back_buffer_index(&self, backend: &B) -> u32 {
        backend.current_back_buffer_index(&self.raw)
    }

    pub fn present(&self, backend: &B, sync_interval: u32, flags: u32) -> Result<(), GpuError> {
        backend.present(&self.raw, sync_interval, flags)
    }
}
