use super::frame::FrameObject;
use super::GpuError;
use crate::hal::{Backend, ClearColor, ResourceState};

/// Lifecycle of the reusable command list.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RecorderState {
    /// Closed with nothing pending.
    Idle,
    /// Open; commands may be recorded.
    Recording,
    /// Closed and ready to submit.
    Recorded,
    /// Handed to the queue. The list may be reset again; the allocator it
    /// recorded into may not until the fence says so.
    Submitted,
}

impl RecorderState {
    fn name(self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Recorded => "recorded",
            RecorderState::Submitted => "submitted",
        }
    }
}

/// Single command list reused for every frame.
///
/// Every operation checks the recorder state first, so commands can only
/// land in an open list and only closed lists reach the queue.
pub struct CommandRecorder<B: Backend> {
    list: B::CommandList,
    state: RecorderState,
}

impl<B: Backend> CommandRecorder<B> {
    pub fn new(
        backend: &B,
        device: &B::Device,
        allocator: &B::CommandAllocator,
    ) -> Result<Self, GpuError> {
        let list = backend.create_command_list(device, allocator)?;
        Ok(Self {
            list,
            state: RecorderState::Idle,
        })
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    fn expect(&self, op: &'static str, allowed: &[RecorderState]) -> Result<(), GpuError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(GpuError::RecorderState {
                op,
                state: self.state.name(),
            })
        }
    }

    /// Opens the list against `allocator`.
    pub fn begin(&mut self, backend: &B, allocator: &B::CommandAllocator) -> Result<(), GpuError> {
        self.expect("reset", &[RecorderState::Idle, RecorderState::Submitted])?;
        backend.reset_command_list(&self.list, allocator)?;
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Records a barrier after validating it against the frame's tracked state.
    pub fn transition(
        &mut self,
        backend: &B,
        frame: &mut FrameObject<B>,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<(), GpuError> {
        self.expect("record a barrier into", &[RecorderState::Recording])?;
        let t = frame.state.transition(from, to)?;
        backend.resource_barrier(&self.list, &frame.buffer, t.before, t.after);
        Ok(())
    }

    /// Records a clear of the frame's render target view.
    pub fn clear(
        &mut self,
        backend: &B,
        frame: &FrameObject<B>,
        color: ClearColor,
    ) -> Result<(), GpuError> {
        self.expect("record a clear into", &[RecorderState::Recording])?;
        let actual = frame.state.current();
        if actual != ResourceState::RenderTarget {
            return Err(GpuError::StateMismatch {
                expected: ResourceState::RenderTarget,
                actual,
            });
        }
        backend.clear_render_target(&self.list, frame.rtv, color);
        Ok(())
    }

    /// Closes the list; nothing more can be recorded until `begin`.
    pub fn finish(&mut self, backend: &B) -> Result<(), GpuError> {
        self.expect("close", &[RecorderState::Recording])?;
        backend.close_command_list(&self.list)?;
        self.state = RecorderState::Recorded;
        Ok(())
    }

    pub fn submit(&mut self, backend: &B, queue: &B::Queue) -> Result<(), GpuError> {
        self.expect("submit", &[RecorderState::Recorded])?;
        backend.execute(queue, &self.list);
        self.state = RecorderState::Submitted;
        Ok(())
    }

    /// Resets the frame's allocator and records the minimal legal frame:
    /// Present -> RenderTarget, clear, RenderTarget -> Present, close.
    ///
    /// `completed` is the fence value the GPU has reached. A frame whose last
    /// submission is newer is rejected before its allocator is touched. On
    /// failure the list is closed and discarded and the frame's tracked
    /// state is left as it was.
    pub fn record_frame(
        &mut self,
        backend: &B,
        frame: &mut FrameObject<B>,
        color: ClearColor,
        completed: u64,
    ) -> Result<(), GpuError> {
        if frame.fence_value > completed {
            return Err(GpuError::FrameInFlight {
                fence_value: frame.fence_value,
                completed,
            });
        }
        self.expect("reset", &[RecorderState::Idle, RecorderState::Submitted])?;
        backend.reset_allocator(&frame.allocator)?;

        let saved = frame.state;
        let result = self.record_clear_sequence(backend, frame, color);

        if result.is_err() {
            frame.state = saved;
            if self.state == RecorderState::Recording {
                if let Err(e) = backend.close_command_list(&self.list) {
                    log::debug!("discarding partially recorded list: {e}");
                }
                self.state = RecorderState::Idle;
            }
        }

        result
    }

    fn record_clear_sequence(
        &mut self,
        backend: &B,
        frame: &mut FrameObject<B>,
        color: ClearColor,
    ) -> Result<(), GpuError> {
        self.begin(backend, &frame.allocator)?;
        self.transition(
            backend,
            frame,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        self.clear(backend, frame, color)?;
        // Additional drawing belongs here, while the buffer is a render target.
        self.transition(
            backend,
            frame,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        self.finish(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::frame::FrameTable;
    use crate::device::heap::create_heap;
    use crate::hal::headless::Headless;
    use crate::hal::{FeatureLevel, Format, HeapKind, SwapChainDesc};
    use raw_window_handle::{RawWindowHandle, WebWindowHandle};

    struct Rig {
        backend: Headless,
        queue: <Headless as Backend>::Queue,
        frames: FrameTable<Headless>,
        recorder: CommandRecorder<Headless>,
        _swap_chain: <Headless as Backend>::SwapChain,
        _heap: crate::device::DescriptorHeap<<Headless as Backend>::DescriptorHeap>,
        _device: <Headless as Backend>::Device,
    }

    fn rig() -> Rig {
        let backend = Headless::default();
        let adapter = backend.enumerate_adapter(0).unwrap().unwrap();
        let device = backend.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let queue = backend.create_queue(&device).unwrap();
        let swap_chain = backend
            .create_swap_chain(
                &queue,
                &SwapChainDesc {
                    window: RawWindowHandle::Web(WebWindowHandle::new(1)),
                    width: 8,
                    height: 8,
                    buffer_count: 2,
                    format: Format::Rgba8Unorm,
                },
            )
            .unwrap();
        let mut heap = create_heap(&backend, &device, HeapKind::RenderTargetView, 3).unwrap();
        let frames = FrameTable::build(
            &backend,
            &device,
            &swap_chain,
            &mut heap,
            2,
            Format::Rgba8UnormSrgb,
        )
        .unwrap();
        let recorder =
            CommandRecorder::new(&backend, &device, &frames.get(0).unwrap().allocator).unwrap();
        Rig {
            backend,
            queue,
            frames,
            recorder,
            _swap_chain: swap_chain,
            _heap: heap,
            _device: device,
        }
    }

    #[test]
    fn recorded_frame_ends_in_present() {
        let mut r = rig();
        let frame = r.frames.get_mut(0).unwrap();

        r.recorder
            .record_frame(&r.backend, frame, ClearColor::RED, 0)
            .unwrap();
        assert_eq!(r.recorder.state(), RecorderState::Recorded);
        assert_eq!(frame.state.current(), ResourceState::Present);

        r.recorder.submit(&r.backend, &r.queue).unwrap();
        assert_eq!(r.recorder.state(), RecorderState::Submitted);
        assert!(r.backend.validation_messages().is_empty());
        assert_eq!(
            r.backend.back_buffer_states(),
            vec![ResourceState::Present, ResourceState::Present]
        );
    }

    #[test]
    fn cannot_submit_an_open_list() {
        let mut r = rig();
        let frame = r.frames.get(0).unwrap();
        r.recorder.begin(&r.backend, &frame.allocator).unwrap();
        let err = r.recorder.submit(&r.backend, &r.queue).unwrap_err();
        assert!(matches!(err, GpuError::RecorderState { op: "submit", state: "recording" }));
    }

    #[test]
    fn cannot_record_into_a_closed_list() {
        let mut r = rig();
        let frame = r.frames.get_mut(0).unwrap();
        let err = r
            .recorder
            .transition(&r.backend, frame, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap_err();
        assert!(matches!(err, GpuError::RecorderState { state: "idle", .. }));
        assert_eq!(frame.state.current(), ResourceState::Present);
    }

    #[test]
    fn clear_requires_render_target_state() {
        let mut r = rig();
        let frame = r.frames.get(0).unwrap();
        r.recorder.begin(&r.backend, &frame.allocator).unwrap();
        let err = r.recorder.clear(&r.backend, frame, ClearColor::BLACK).unwrap_err();
        assert_eq!(
            err,
            GpuError::StateMismatch {
                expected: ResourceState::RenderTarget,
                actual: ResourceState::Present,
            }
        );
    }

    #[test]
    fn failed_recording_restores_state_and_recorder() {
        let mut r = rig();
        let frame = r.frames.get_mut(1).unwrap();
        // Pretend a previous frame left the buffer as a render target.
        frame.state = crate::device::TrackedState::new(ResourceState::RenderTarget);

        let err = r
            .recorder
            .record_frame(&r.backend, frame, ClearColor::RED, 0)
            .unwrap_err();
        assert!(matches!(err, GpuError::StateMismatch { .. }));
        assert_eq!(frame.state.current(), ResourceState::RenderTarget);
        assert_eq!(r.recorder.state(), RecorderState::Idle);

        // The recorder is usable again.
        frame.state = crate::device::TrackedState::new(ResourceState::Present);
        r.recorder
            .record_frame(&r.backend, frame, ClearColor::RED, 0)
            .unwrap();
    }

    #[test]
    fn pending_frame_is_rejected_before_allocator_reset() {
        let mut r = rig();
        let frame = r.frames.get_mut(0).unwrap();
        frame.fence_value = 5;

        let calls = r.backend.calls();
        let err = r
            .recorder
            .record_frame(&r.backend, frame, ClearColor::RED, 4)
            .unwrap_err();
        assert_eq!(
            err,
            GpuError::FrameInFlight {
                fence_value: 5,
                completed: 4
            }
        );
        assert_eq!(r.backend.calls(), calls);
        assert_eq!(r.recorder.state(), RecorderState::Idle);
        assert_eq!(frame.state.current(), ResourceState::Present);

        r.recorder
            .record_frame(&r.backend, frame, ClearColor::RED, 5)
            .unwrap();
        assert_eq!(r.recorder.state(), RecorderState::Recorded);
    }

    #[test]
    fn repeated_frames_are_idempotent() {
        let mut r = rig();
        for _ in 0..4 {
            let frame = r.frames.get_mut(0).unwrap();
            r.recorder
                .record_frame(&r.backend, frame, ClearColor::RED, 0)
                .unwrap();
            r.recorder.submit(&r.backend, &r.queue).unwrap();
            assert_eq!(frame.state.current(), ResourceState::Present);
        }
        assert!(r.backend.validation_messages().is_empty());
    }
}
