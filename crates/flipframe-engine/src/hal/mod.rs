//! Native graphics API boundary.
//!
//! `Backend` is the only place the engine touches the driver. Each method is
//! a thin mapping of one native call; ordering, state bookkeeping and
//! validation live in `device`.
//!
//! Two implementations exist:
//! - `d3d12` (Windows): Direct3D 12 + DXGI through the `windows` crate
//! - `headless`: an in-process simulation of the same contract

mod types;

#[cfg(windows)]
pub mod d3d12;
pub mod headless;

pub use types::{
    AdapterInfo, ClearColor, CpuDescriptorHandle, FeatureLevel, Format, HeapKind, ResourceState,
    SwapChainDesc,
};

use crate::device::GpuError;

/// Native graphics API surface used by the engine.
///
/// Handle types are owned; dropping one releases the native object. Command
/// lists are created closed.
pub trait Backend {
    type Adapter;
    type Device;
    type Queue;
    type SwapChain;
    type DescriptorHeap;
    type CommandAllocator;
    type CommandList;
    type Resource;
    type Fence;
    type Event;

    /// Whether the platform can create a device at `level` at all.
    fn is_supported(&self, level: FeatureLevel) -> bool;

    /// Enables the validation layer. Returns `false` when it is unavailable.
    fn enable_debug_layer(&self) -> bool;

    /// Returns the adapter at `index`, or `None` once enumeration is exhausted.
    fn enumerate_adapter(&self, index: u32) -> Result<Option<Self::Adapter>, GpuError>;

    fn adapter_info(&self, adapter: &Self::Adapter, index: u32) -> Result<AdapterInfo, GpuError>;

    /// Probes device creation on `adapter` without keeping the device.
    fn adapter_supports(&self, adapter: &Self::Adapter, level: FeatureLevel) -> bool;

    fn create_device(
        &self,
        adapter: &Self::Adapter,
        level: FeatureLevel,
    ) -> Result<Self::Device, GpuError>;

    /// Creates a direct queue with no flags.
    fn create_queue(&self, device: &Self::Device) -> Result<Self::Queue, GpuError>;

    /// Creates a flip-discard, single-sample swap chain bound to the window.
    fn create_swap_chain(
        &self,
        queue: &Self::Queue,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain, GpuError>;

    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32;

    fn swap_chain_buffer(
        &self,
        swap_chain: &Self::SwapChain,
        index: u32,
    ) -> Result<Self::Resource, GpuError>;

    fn present(
        &self,
        swap_chain: &Self::SwapChain,
        sync_interval: u32,
        flags: u32,
    ) -> Result<(), GpuError>;

    fn create_descriptor_heap(
        &self,
        device: &Self::Device,
        kind: HeapKind,
        capacity: u32,
    ) -> Result<Self::DescriptorHeap, GpuError>;

    fn heap_start(&self, heap: &Self::DescriptorHeap) -> CpuDescriptorHandle;

    /// Byte stride between two descriptors of `kind`. Hardware specific.
    fn descriptor_increment(&self, device: &Self::Device, kind: HeapKind) -> u32;

    fn create_render_target_view(
        &self,
        device: &Self::Device,
        resource: &Self::Resource,
        format: Format,
        handle: CpuDescriptorHandle,
    );

    /// Creates a direct command allocator.
    fn create_command_allocator(
        &self,
        device: &Self::Device,
    ) -> Result<Self::CommandAllocator, GpuError>;

    fn create_command_list(
        &self,
        device: &Self::Device,
        allocator: &Self::CommandAllocator,
    ) -> Result<Self::CommandList, GpuError>;

    fn reset_allocator(&self, allocator: &Self::CommandAllocator) -> Result<(), GpuError>;

    fn reset_command_list(
        &self,
        list: &Self::CommandList,
        allocator: &Self::CommandAllocator,
    ) -> Result<(), GpuError>;

    fn resource_barrier(
        &self,
        list: &Self::CommandList,
        resource: &Self::Resource,
        before: ResourceState,
        after: ResourceState,
    );

    fn clear_render_target(
        &self,
        list: &Self::CommandList,
        handle: CpuDescriptorHandle,
        color: ClearColor,
    );

    fn close_command_list(&self, list: &Self::CommandList) -> Result<(), GpuError>;

    fn execute(&self, queue: &Self::Queue, list: &Self::CommandList);

    fn create_fence(&self, device: &Self::Device, initial: u64) -> Result<Self::Fence, GpuError>;

    /// Creates the auto-reset event the CPU blocks on.
    fn create_event(&self) -> Result<Self::Event, GpuError>;

    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> Result<(), GpuError>;

    fn completed_value(&self, fence: &Self::Fence) -> u64;

    /// Blocks until the fence reaches `value`.
    ///
    /// Fails with `GpuError::DeviceLost` if the device is removed.
    fn wait_for_value(
        &self,
        device: &Self::Device,
        fence: &Self::Fence,
        value: u64,
        event: &Self::Event,
    ) -> Result<(), GpuError>;

    /// Returns the removal reason if the device is no longer usable.
    fn device_removed_reason(&self, device: &Self::Device) -> Option<String>;
}
