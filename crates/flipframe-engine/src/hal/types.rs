use std::fmt;

use raw_window_handle::RawWindowHandle;

/// Minimum hardware capability tier a device must expose.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
    Level12_2,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureLevel::Level11_0 => "11.0",
            FeatureLevel::Level11_1 => "11.1",
            FeatureLevel::Level12_0 => "12.0",
            FeatureLevel::Level12_1 => "12.1",
            FeatureLevel::Level12_2 => "12.2",
        };
        f.write_str(s)
    }
}

/// Color formats used by the presentation surface.
///
/// Swap-chain storage is always a linear format; the sRGB variants are only
/// valid as view formats.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
}

impl Format {
    /// Returns the gamma-correcting view format for a storage format.
    pub fn srgb(self) -> Format {
        match self {
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb => Format::Rgba8UnormSrgb,
            Format::Bgra8Unorm | Format::Bgra8UnormSrgb => Format::Bgra8UnormSrgb,
        }
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, Format::Rgba8UnormSrgb | Format::Bgra8UnormSrgb)
    }
}

/// Kind of descriptors a heap stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HeapKind {
    RenderTargetView,
    DepthStencilView,
    ShaderResourceView,
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HeapKind::RenderTargetView => "rtv",
            HeapKind::DepthStencilView => "dsv",
            HeapKind::ShaderResourceView => "cbv/srv/uav",
        };
        f.write_str(s)
    }
}

/// CPU-visible address of one descriptor slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CpuDescriptorHandle(pub usize);

impl CpuDescriptorHandle {
    pub fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

/// Access mode a GPU resource is currently declared to be in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    /// Owned by the presentation engine.
    Present,
    /// Writable as a color attachment.
    RenderTarget,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Present => f.write_str("present"),
            ResourceState::RenderTarget => f.write_str("render-target"),
        }
    }
}

/// Linear RGBA clear color.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
    pub const BLACK: ClearColor = ClearColor([0.0, 0.0, 0.0, 1.0]);
    pub const RED: ClearColor = ClearColor([1.0, 0.0, 0.0, 1.0]);

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }
}

/// Diagnostic description of a physical adapter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AdapterInfo {
    pub index: u32,
    pub description: String,
    pub software: bool,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
}

/// Parameters for swap-chain creation.
#[derive(Debug, Copy, Clone)]
pub struct SwapChainDesc {
    pub window: RawWindowHandle,
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
}
