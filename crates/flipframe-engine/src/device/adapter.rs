use super::GpuError;
use crate::hal::{AdapterInfo, Backend, FeatureLevel};

/// Returns the first hardware adapter able to create a device at `level`.
///
/// Adapters are visited by increasing index until enumeration is exhausted.
/// Software (emulated) adapters are never returned.
pub fn select_hardware_adapter<B: Backend>(
    backend: &B,
    level: FeatureLevel,
) -> Result<(B::Adapter, AdapterInfo), GpuError> {
    let mut index = 0;

    while let Some(adapter) = backend.enumerate_adapter(index)? {
        let info = backend.adapter_info(&adapter, index)?;
        log::info!("adapter {}: {}", info.index, info.description);

        if info.software {
            log::debug!("adapter {index}: skipped (software)");
        } else if !backend.adapter_supports(&adapter, level) {
            log::debug!("adapter {index}: skipped (no feature level {level})");
        } else {
            return Ok((adapter, info));
        }

        index += 1;
    }

    Err(GpuError::NoHardwareAdapter {
        required: level,
        enumerated: index,
    })
}
