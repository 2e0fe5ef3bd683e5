use super::heap::DescriptorHeap;
use super::state::TrackedState;
use super::GpuError;
use crate::hal::{Backend, CpuDescriptorHandle, Format, ResourceState};

/// Per swap-chain buffer resources.
///
/// The allocator must not be reset until the fence has reached
/// `fence_value`, the value signaled after this frame's last submission.
pub struct FrameObject<B: Backend> {
    pub allocator: B::CommandAllocator,
    pub buffer: B::Resource,
    pub rtv: CpuDescriptorHandle,
    pub state: TrackedState,
    /// 0 until the frame has been submitted once.
    pub fence_value: u64,
}

/// One `FrameObject` per swap-chain buffer, indexed by buffer index.
///
/// Built once at startup; per-frame code only indexes into it.
pub struct FrameTable<B: Backend> {
    frames: Vec<FrameObject<B>>,
}

impl<B: Backend> FrameTable<B> {
    /// Creates an allocator, fetches the buffer and writes a render target
    /// view for every buffer index in `0..buffer_count`.
    pub fn build(
        backend: &B,
        device: &B::Device,
        swap_chain: &B::SwapChain,
        heap: &mut DescriptorHeap<B::DescriptorHeap>,
        buffer_count: u32,
        view_format: Format,
    ) -> Result<Self, GpuError> {
        let mut frames = Vec::with_capacity(buffer_count as usize);

        for i in 0..buffer_count {
            let allocator = backend.create_command_allocator(device)?;
            let buffer = backend.swap_chain_buffer(swap_chain, i)?;
            let rtv = heap.allocate()?;
            backend.create_render_target_view(device, &buffer, view_format, rtv);

            log::debug!("frame {i}: rtv {:#x}", rtv.0);

            frames.push(FrameObject {
                allocator,
                buffer,
                rtv,
                state: TrackedState::new(ResourceState::Present),
                fence_value: 0,
            });
        }

        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameObject<B>> {
        self.frames.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FrameObject<B>> {
        self.frames.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameObject<B>> {
        self.frames.iter()
    }
}
