use super::adapter::select_hardware_adapter;
use super::fence::FenceSync;
use super::frame::FrameTable;
use super::heap::{create_heap, DescriptorHeap};
use super::recorder::{CommandRecorder, RecorderState};
use super::surface::{Surface, SurfaceTarget};
use super::{GpuError, GpuInit};
use crate::hal::{AdapterInfo, Backend, ClearColor, HeapKind};

/// Outcome of one rendered frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameReport {
    /// Swap-chain buffer that was rendered and presented.
    pub back_buffer_index: u32,
    /// Fence value signaled after the frame's commands.
    pub fence_value: u64,
}

/// Owns every GPU object for one window.
///
/// This type is the low-level rendering context:
/// - selects the adapter and creates Device/Queue
/// - creates the swap chain, RTV heap and one frame object per buffer
/// - records, submits and presents frames, fencing allocator reuse
///
/// Once device loss is observed every method fails with
/// `GpuError::DeviceLost` without calling the driver; the owner must drop
/// this value and build a new one.
pub struct Gpu<B: Backend> {
    // Fields drop top to bottom, the reverse of creation order.
    sync: FenceSync<B>,
    recorder: CommandRecorder<B>,
    frames: FrameTable<B>,
    rtv_heap: DescriptorHeap<B::DescriptorHeap>,
    surface: Surface<B>,
    queue: B::Queue,
    device: B::Device,
    backend: B,

    adapter: AdapterInfo,
    init: GpuInit,
    lost: Option<String>,
}

impl<B: Backend> Gpu<B> {
    /// Creates a GPU context presenting into `target`.
    ///
    /// Any failure aborts the whole construction; objects created before the
    /// failing step are released in reverse order.
    pub fn new(backend: B, target: SurfaceTarget, init: GpuInit) -> Result<Self, GpuError> {
        init.validate()?;

        let level = init.min_feature_level;
        if !backend.is_supported(level) {
            return Err(GpuError::UnsupportedPlatform { required: level });
        }

        if init.debug_layer {
            if backend.enable_debug_layer() {
                log::info!("GPU validation layer enabled");
            } else {
                log::debug!("GPU validation layer unavailable; continuing without it");
            }
        }

        let (adapter, adapter_info) = select_hardware_adapter(&backend, level)?;
        let device = backend.create_device(&adapter, level)?;
        // The adapter is only needed to create the device.
        drop(adapter);

        let queue = backend.create_queue(&device)?;
        let surface = Surface::create(&backend, &queue, target, &init)?;

        let mut rtv_heap = create_heap(
            &backend,
            &device,
            HeapKind::RenderTargetView,
            init.rtv_heap_capacity,
        )?;
        let frames = FrameTable::build(
            &backend,
            &device,
            surface.raw(),
            &mut rtv_heap,
            surface.buffer_count(),
            surface.view_format(),
        )?;

        let first = frames
            .get(0)
            .ok_or_else(|| GpuError::InvalidConfig("frame table is empty".into()))?;
        let recorder = CommandRecorder::new(&backend, &device, &first.allocator)?;
        let sync = FenceSync::new(&backend, &device)?;

        log::info!(
            "GPU ready on \"{}\": {}x{}, {} buffers, feature level {level}",
            adapter_info.description,
            target.width,
            target.height,
            surface.buffer_count()
        );

        Ok(Self {
            sync,
            recorder,
            frames,
            rtv_heap,
            surface,
            queue,
            device,
            backend,
            adapter: adapter_info,
            init,
            lost: None,
        })
    }

    /// Adapter the device was created on.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn surface(&self) -> &Surface<B> {
        &self.surface
    }

    pub fn frames(&self) -> &FrameTable<B> {
        &self.frames
    }

    pub fn rtv_heap(&self) -> &DescriptorHeap<B::DescriptorHeap> {
        &self.rtv_heap
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn buffer_count(&self) -> u32 {
        self.surface.buffer_count()
    }

    /// Buffer the next frame will render into.
    pub fn current_back_buffer_index(&self) -> Result<u32, GpuError> {
        self.ensure_alive()?;
        Ok(self.surface.current_back_buffer_index(&self.backend))
    }

    /// Newest fence value handed to the queue.
    pub fn last_fence_value(&self) -> u64 {
        self.sync.last_signaled()
    }

    /// Fence value the GPU has reached.
    pub fn completed_fence_value(&self) -> Result<u64, GpuError> {
        self.ensure_alive()?;
        Ok(self.sync.completed(&self.backend))
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    pub fn lost_reason(&self) -> Option<&str> {
        self.lost.as_deref()
    }

    /// Clears the current back buffer to `color` and presents it.
    ///
    /// Waits for the buffer's previous submission before its allocator is
    /// reset, so this is safe to call once per frame in a loop.
    pub fn render_frame(&mut self, color: ClearColor) -> Result<FrameReport, GpuError> {
        self.ensure_alive()?;
        let result = self.record_submit_present(color);
        self.latch(result)
    }

    /// Blocks until every submission so far has executed.
    pub fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.ensure_alive()?;
        let result = self.flush();
        self.latch(result)
    }

    fn record_submit_present(&mut self, color: ClearColor) -> Result<FrameReport, GpuError> {
        let backend = &self.backend;

        let index = self.surface.current_back_buffer_index(backend);
        let frame = self.frames.get_mut(index as usize).ok_or_else(|| {
            GpuError::native(
                "GetCurrentBackBufferIndex",
                format!("index {index} is outside the frame table"),
            )
        })?;

        self.sync.wait_until(backend, &self.device, frame.fence_value)?;
        let completed = self.sync.completed(backend);

        self.recorder.record_frame(backend, frame, color, completed)?;
        self.recorder.submit(backend, &self.queue)?;

        let fence_value = self.sync.signal(backend, &self.queue)?;
        frame.fence_value = fence_value;

        self.surface
            .present(backend, self.init.sync_interval, self.init.present_flags)?;

        log::trace!("frame presented: buffer {index}, fence {fence_value}");
        Ok(FrameReport {
            back_buffer_index: index,
            fence_value,
        })
    }

    fn flush(&mut self) -> Result<(), GpuError> {
        let value = self.sync.signal(&self.backend, &self.queue)?;
        self.sync.wait_until(&self.backend, &self.device, value)
    }

    fn ensure_alive(&self) -> Result<(), GpuError> {
        match &self.lost {
            Some(reason) => Err(GpuError::DeviceLost {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Records device loss. Any native failure on a device that reports a
    /// removal reason is loss, whichever call noticed it first.
    fn latch<T>(&mut self, result: Result<T, GpuError>) -> Result<T, GpuError> {
        let result = match result {
            Err(GpuError::Native { call, message }) => {
                match self.backend.device_removed_reason(&self.device) {
                    Some(reason) => {
                        log::debug!("{call} failed on a removed device: {message}");
                        Err(GpuError::DeviceLost { reason })
                    }
                    None => Err(GpuError::Native { call, message }),
                }
            }
            other => other,
        };
        if let Err(GpuError::DeviceLost { reason }) = &result {
            log::error!("GPU device lost: {reason}");
            self.lost = Some(reason.clone());
        }
        result
    }
}

impl<B: Backend> Drop for Gpu<B> {
    fn drop(&mut self) {
        if self.lost.is_some() {
            return;
        }
        // Buffers and allocators must not be released while in use.
        if let Err(e) = self.wait_idle() {
            log::warn!("GPU teardown without idle wait: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::headless::{Headless, HeadlessConfig, Latency};
    use crate::hal::{FeatureLevel, ResourceState};
    use raw_window_handle::{RawWindowHandle, Win32WindowHandle};
    use std::num::NonZeroIsize;

    fn target(width: u32, height: u32) -> SurfaceTarget {
        let hwnd = Win32WindowHandle::new(NonZeroIsize::new(0x10).unwrap());
        SurfaceTarget::new(RawWindowHandle::Win32(hwnd), width, height)
    }

    #[test]
    fn unsupported_platform_fails_before_enumeration() {
        let h = Headless::new(HeadlessConfig {
            platform_level: FeatureLevel::Level11_1,
            ..Default::default()
        });
        let err = Gpu::new(h.clone(), target(800, 600), GpuInit::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            GpuError::UnsupportedPlatform {
                required: FeatureLevel::Level12_0
            }
        );
        assert_eq!(h.calls(), 1);
    }

    #[test]
    fn debug_layer_follows_config() {
        let h = Headless::default();
        let gpu = Gpu::new(
            h.clone(),
            target(64, 64),
            GpuInit {
                debug_layer: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(h.debug_layer_enabled());
        drop(gpu);

        let h = Headless::default();
        let _gpu = Gpu::new(
            h.clone(),
            target(64, 64),
            GpuInit {
                debug_layer: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!h.debug_layer_enabled());
    }

    #[test]
    fn missing_debug_layer_is_tolerated() {
        let h = Headless::new(HeadlessConfig {
            debug_layer_available: false,
            ..Default::default()
        });
        let gpu = Gpu::new(
            h,
            target(64, 64),
            GpuInit {
                debug_layer: true,
                ..Default::default()
            },
        );
        assert!(gpu.is_ok());
    }

    #[test]
    fn frames_alternate_buffers_and_fence_values() {
        let h = Headless::default();
        let mut gpu = Gpu::new(h.clone(), target(800, 600), GpuInit::default()).unwrap();

        let reports: Vec<FrameReport> = (0..4)
            .map(|_| gpu.render_frame(ClearColor::RED).unwrap())
            .collect();
        let indices: Vec<u32> = reports.iter().map(|r| r.back_buffer_index).collect();
        let values: Vec<u64> = reports.iter().map(|r| r.fence_value).collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(gpu.recorder_state(), RecorderState::Submitted);

        let presented = h.presented();
        assert_eq!(presented.len(), 4);
        assert!(presented.iter().all(|p| p.color == Some(ClearColor::RED)));
        assert!(h.validation_messages().is_empty());
    }

    #[test]
    fn allocator_is_never_reset_while_in_flight() {
        let h = Headless::new(HeadlessConfig {
            latency: Latency::Deferred,
            ..Default::default()
        });
        let mut gpu = Gpu::new(h.clone(), target(800, 600), GpuInit::default()).unwrap();

        for _ in 0..6 {
            gpu.render_frame(ClearColor::rgba(0.0, 0.5, 1.0, 1.0)).unwrap();
        }
        // The third frame reuses buffer 0 and must have waited for fence 1.
        assert!(gpu.completed_fence_value().unwrap() >= 4);
        assert!(h.validation_messages().is_empty());

        gpu.wait_idle().unwrap();
        assert_eq!(h.pending_work(), 0);
        assert_eq!(h.presented().len(), 6);
        assert_eq!(
            h.back_buffer_states(),
            vec![ResourceState::Present, ResourceState::Present]
        );
    }

    #[test]
    fn teardown_releases_everything() {
        let h = Headless::default();
        {
            let mut gpu = Gpu::new(h.clone(), target(320, 240), GpuInit::default()).unwrap();
            gpu.render_frame(ClearColor::BLACK).unwrap();
            assert!(h.live_objects() > 0);
        }
        assert_eq!(h.live_objects(), 0);
    }

    #[test]
    fn present_flags_reach_the_swap_chain() {
        let h = Headless::default();
        let mut gpu = Gpu::new(
            h.clone(),
            target(64, 64),
            GpuInit {
                present_flags: 0x200,
                ..Default::default()
            },
        )
        .unwrap();

        gpu.render_frame(ClearColor::RED).unwrap();
        gpu.render_frame(ClearColor::RED).unwrap();
        assert!(h.presented().iter().all(|p| p.flags == 0x200));
    }

    #[test]
    fn removal_reported_by_allocator_reset_is_device_loss() {
        let h = Headless::default();
        let mut gpu = Gpu::new(h.clone(), target(800, 600), GpuInit::default()).unwrap();
        gpu.render_frame(ClearColor::RED).unwrap();

        // Buffer 1 was never submitted, so no fence wait precedes the reset.
        h.remove_device("gone");
        let err = gpu.render_frame(ClearColor::RED).unwrap_err();
        assert_eq!(
            err,
            GpuError::DeviceLost {
                reason: "gone".into()
            }
        );
        assert_eq!(err.action(), crate::device::ErrorAction::Recreate);
        assert!(gpu.is_lost());
        assert_eq!(gpu.recorder_state(), RecorderState::Submitted);
        assert_eq!(h.presented().len(), 1);
    }

    #[test]
    fn device_loss_is_latched() {
        let h = Headless::default();
        let mut gpu = Gpu::new(h.clone(), target(800, 600), GpuInit::default()).unwrap();
        gpu.render_frame(ClearColor::RED).unwrap();

        h.remove_device("hung");
        let err = gpu.render_frame(ClearColor::RED).unwrap_err();
        assert!(err.is_device_lost());
        assert!(gpu.is_lost());
        assert_eq!(gpu.lost_reason(), Some("hung"));

        let calls = h.calls();
        assert!(gpu.render_frame(ClearColor::RED).unwrap_err().is_device_lost());
        assert!(gpu.wait_idle().unwrap_err().is_device_lost());
        assert!(gpu.current_back_buffer_index().is_err());
        drop(gpu);
        assert_eq!(h.calls(), calls);
    }
}
