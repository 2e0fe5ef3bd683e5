use super::GpuError;
use crate::hal::{FeatureLevel, Format};

/// Initialization parameters for the GPU layer.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Lowest feature level the selected adapter must support.
    pub min_feature_level: FeatureLevel,

    /// Number of swap-chain buffers (and frame objects).
    ///
    /// Flip-model swap chains accept 2..=16.
    pub buffer_count: u32,

    /// Capacity of the render-target-view heap.
    ///
    /// Must cover `buffer_count`; any excess is spare.
    pub rtv_heap_capacity: u32,

    /// Swap-chain storage format. Views use its sRGB counterpart.
    pub surface_format: Format,

    /// Request the GPU validation layer before device creation.
    ///
    /// Best effort: an unavailable layer is logged and ignored.
    pub debug_layer: bool,

    /// Vertical blanks to wait for on present. 0 presents immediately.
    pub sync_interval: u32,

    /// `DXGI_PRESENT` flag bits passed to every present.
    pub present_flags: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            min_feature_level: FeatureLevel::Level12_0,
            buffer_count: 2,
            rtv_heap_capacity: 3,
            surface_format: Format::Rgba8Unorm,
            debug_layer: cfg!(debug_assertions),
            sync_interval: 0,
            present_flags: 0,
        }
    }
}

impl GpuInit {
    pub(crate) fn validate(&self) -> Result<(), GpuError> {
        if !(2..=16).contains(&self.buffer_count) {
            return Err(GpuError::InvalidConfig(format!(
                "buffer_count must be within 2..=16, got {}",
                self.buffer_count
            )));
        }
        if self.rtv_heap_capacity < self.buffer_count {
            return Err(GpuError::InvalidConfig(format!(
                "rtv_heap_capacity {} cannot hold {} render target views",
                self.rtv_heap_capacity, self.buffer_count
            )));
        }
        if self.surface_format.is_srgb() {
            return Err(GpuError::InvalidConfig(format!(
                "{:?} is a view format; swap-chain storage must be linear",
                self.surface_format
            )));
        }
        if self.sync_interval > 4 {
            return Err(GpuError::InvalidConfig(format!(
                "sync_interval must be within 0..=4, got {}",
                self.sync_interval
            )));
        }
        Ok(())
    }
}
