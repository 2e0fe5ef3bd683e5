use std::num::NonZeroIsize;

use flipframe_engine::device::{create_heap, RecorderState};
use flipframe_engine::hal::headless::{Headless, HeadlessConfig, Latency};
use flipframe_engine::hal::{Backend, FeatureLevel, HeapKind};
use flipframe_engine::{ClearColor, ErrorAction, Gpu, GpuError, GpuInit, SurfaceTarget};
use raw_window_handle::{RawWindowHandle, Win32WindowHandle};

fn window(width: u32, height: u32) -> SurfaceTarget {
    let hwnd = Win32WindowHandle::new(NonZeroIsize::new(0xBEEF).unwrap());
    SurfaceTarget::new(RawWindowHandle::Win32(hwnd), width, height)
}

#[test]
fn first_frame_on_800x600_window() {
    let h = Headless::default();
    let mut gpu = Gpu::new(h.clone(), window(800, 600), GpuInit::default()).unwrap();

    assert_eq!(gpu.buffer_count(), 2);
    assert!(!gpu.adapter().software);
    assert_eq!(gpu.rtv_heap().used_entries(), 2);

    let report = gpu.render_frame(ClearColor::RED).unwrap();
    assert!(report.back_buffer_index < 2);
    assert_eq!(report.fence_value, 1);
    assert_eq!(gpu.recorder_state(), RecorderState::Submitted);

    gpu.wait_idle().unwrap();
    assert_eq!(gpu.completed_fence_value().unwrap(), gpu.last_fence_value());

    let presented = h.presented();
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].color, Some(ClearColor::RED));
    assert!(h.validation_messages().is_empty());
}

#[test]
fn zero_width_window_leaves_nothing_behind() {
    let h = Headless::default();
    let err = Gpu::new(h.clone(), window(0, 600), GpuInit::default())
        .err()
        .unwrap();

    assert_eq!(err, GpuError::DegenerateSurface { width: 0, height: 600 });
    assert_eq!(err.action(), ErrorAction::Fatal);
    assert_eq!(h.live_objects(), 0);
}

#[test]
fn fourth_view_in_three_slot_heap_fails() {
    let h = Headless::default();
    let adapter = h.enumerate_adapter(0).unwrap().unwrap();
    let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
    let mut heap = create_heap(&h, &device, HeapKind::RenderTargetView, 3).unwrap();

    let handles: Vec<_> = (0..3).map(|_| heap.allocate().unwrap()).collect();
    let stride = heap.increment() as usize;
    assert_eq!(handles[2].0, heap.start().0 + 2 * stride);

    let err = heap.allocate().unwrap_err();
    assert_eq!(
        err,
        GpuError::HeapExhausted {
            kind: HeapKind::RenderTargetView,
            capacity: 3
        }
    );
    assert_eq!(heap.used_entries(), 3);
}

#[test]
fn device_removed_during_wait_stops_all_gpu_calls() {
    let h = Headless::new(HeadlessConfig {
        latency: Latency::Deferred,
        ..Default::default()
    });
    let mut gpu = Gpu::new(h.clone(), window(800, 600), GpuInit::default()).unwrap();

    gpu.render_frame(ClearColor::RED).unwrap();
    gpu.render_frame(ClearColor::RED).unwrap();

    // The third frame reuses buffer 0 and blocks on fence 1.
    h.remove_device_during_next_wait("DXGI_ERROR_DEVICE_HUNG");
    let err = gpu.render_frame(ClearColor::RED).unwrap_err();
    assert_eq!(
        err,
        GpuError::DeviceLost {
            reason: "DXGI_ERROR_DEVICE_HUNG".into()
        }
    );
    assert_eq!(err.action(), ErrorAction::Recreate);
    assert_eq!(h.presented().len(), 0);

    let calls = h.calls();
    assert!(gpu.render_frame(ClearColor::RED).unwrap_err().is_device_lost());
    drop(gpu);
    assert_eq!(h.calls(), calls);
}

#[test]
fn rebuilt_context_renders_after_loss() {
    let lost = Headless::default();
    let mut gpu = Gpu::new(lost.clone(), window(640, 480), GpuInit::default()).unwrap();
    lost.remove_device("reset");
    assert!(gpu.render_frame(ClearColor::BLACK).unwrap_err().is_device_lost());
    drop(gpu);

    let fresh = Headless::default();
    let mut gpu = Gpu::new(fresh.clone(), window(640, 480), GpuInit::default()).unwrap();
    let report = gpu.render_frame(ClearColor::BLACK).unwrap();
    assert_eq!(report.fence_value, 1);
}
