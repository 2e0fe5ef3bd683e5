//! Direct3D 12 + DXGI implementation of `Backend`.

use std::mem::ManuallyDrop;

use raw_window_handle::RawWindowHandle;
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, INFINITE, WaitForSingleObject};

use super::{
    AdapterInfo, Backend, ClearColor, CpuDescriptorHandle, FeatureLevel, Format, HeapKind,
    ResourceState, SwapChainDesc,
};
use crate::device::GpuError;

fn is_device_loss(e: &windows::core::Error) -> bool {
    e.code() == DXGI_ERROR_DEVICE_REMOVED || e.code() == DXGI_ERROR_DEVICE_RESET
}

/// Maps a failed call to `GpuError`. Removal and reset HRESULTs become
/// `DeviceLost` whichever call reports them first.
fn native(call: &'static str) -> impl Fn(windows::core::Error) -> GpuError {
    move |e| {
        if is_device_loss(&e) {
            GpuError::DeviceLost {
                reason: format!("{call}: {e}"),
            }
        } else {
            GpuError::native(call, e.to_string())
        }
    }
}

fn feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

fn dxgi_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    }
}

fn heap_type(kind: HeapKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        HeapKind::RenderTargetView => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        HeapKind::DepthStencilView => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        HeapKind::ShaderResourceView => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

/// Win32 event closed on drop.
#[derive(Debug)]
pub struct FenceEvent(HANDLE);

impl Drop for FenceEvent {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            log::warn!("CloseHandle on fence event failed: {e}");
        }
    }
}

/// Direct3D 12 backend.
///
/// Holds the DXGI factory used for adapter enumeration and swap-chain
/// creation.
pub struct D3d12 {
    factory: IDXGIFactory4,
}

impl D3d12 {
    /// Creates the DXGI factory. `debug` requests the debug factory and
    /// silently falls back when the graphics tools are not installed.
    pub fn new(debug: bool) -> Result<Self, GpuError> {
        if debug {
            match unsafe { CreateDXGIFactory2::<IDXGIFactory4>(DXGI_CREATE_FACTORY_DEBUG) } {
                Ok(factory) => return Ok(Self { factory }),
                Err(e) => log::debug!("DXGI debug factory unavailable: {e}"),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)) }
            .map_err(native("CreateDXGIFactory2"))?;
        Ok(Self { factory })
    }
}

impl Backend for D3d12 {
    type Adapter = IDXGIAdapter1;
    type Device = ID3D12Device;
    type Queue = ID3D12CommandQueue;
    type SwapChain = IDXGISwapChain3;
    type DescriptorHeap = ID3D12DescriptorHeap;
    type CommandAllocator = ID3D12CommandAllocator;
    type CommandList = ID3D12GraphicsCommandList;
    type Resource = ID3D12Resource;
    type Fence = ID3D12Fence;
    type Event = FenceEvent;

    fn is_supported(&self, level: FeatureLevel) -> bool {
        // Adapter 0 is the default adapter the runtime would pick.
        match unsafe { self.factory.EnumAdapters1(0) } {
            Ok(adapter) => self.adapter_supports(&adapter, level),
            Err(_) => false,
        }
    }

    fn enable_debug_layer(&self) -> bool {
        let mut debug: Option<ID3D12Debug> = None;
        if unsafe { D3D12GetDebugInterface(&mut debug) }.is_err() {
            return false;
        }
        match debug {
            Some(debug) => {
                unsafe { debug.EnableDebugLayer() };
                true
            }
            None => false,
        }
    }

    fn enumerate_adapter(&self, index: u32) -> Result<Option<IDXGIAdapter1>, GpuError> {
        match unsafe { self.factory.EnumAdapters1(index) } {
            Ok(adapter) => Ok(Some(adapter)),
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => Ok(None),
            Err(e) => Err(native("EnumAdapters1")(e)),
        }
    }

    fn adapter_info(&self, adapter: &IDXGIAdapter1, index: u32) -> Result<AdapterInfo, GpuError> {
        let desc = unsafe { adapter.GetDesc1() }.map_err(native("GetDesc1"))?;
        let len = desc
            .Description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.Description.len());

        Ok(AdapterInfo {
            index,
            description: String::from_utf16_lossy(&desc.Description[..len]),
            software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
            vendor_id: desc.VendorId,
            device_id: desc.DeviceId,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        })
    }

    fn adapter_supports(&self, adapter: &IDXGIAdapter1, level: FeatureLevel) -> bool {
        unsafe {
            D3D12CreateDevice(
                adapter,
                feature_level(level),
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok()
    }

    fn create_device(&self, adapter: &IDXGIAdapter1, level: FeatureLevel) -> Result<ID3D12Device, GpuError> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(adapter, feature_level(level), &mut device) }
            .map_err(native("D3D12CreateDevice"))?;
        device.ok_or_else(|| GpuError::native("D3D12CreateDevice", "no device returned"))
    }

    fn create_queue(&self, device: &ID3D12Device) -> Result<ID3D12CommandQueue, GpuError> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        unsafe { device.CreateCommandQueue(&desc) }.map_err(native("CreateCommandQueue"))
    }

    fn create_swap_chain(
        &self,
        queue: &ID3D12CommandQueue,
        desc: &SwapChainDesc,
    ) -> Result<IDXGISwapChain3, GpuError> {
        let RawWindowHandle::Win32(handle) = desc.window else {
            return Err(GpuError::UnsupportedWindowHandle(format!(
                "{:?}; Direct3D 12 presents to Win32 windows only",
                desc.window
            )));
        };
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::DegenerateSurface {
                width: desc.width,
                height: desc.height,
            });
        }

        let hwnd = HWND(handle.hwnd.get() as *mut std::ffi::c_void);
        let sc_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: dxgi_format(desc.format),
            BufferCount: desc.buffer_count,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 =
            unsafe { self.factory.CreateSwapChainForHwnd(queue, hwnd, &sc_desc, None, None) }
                .map_err(native("CreateSwapChainForHwnd"))?;
        swap_chain
            .cast::<IDXGISwapChain3>()
            .map_err(native("IDXGISwapChain1::cast"))
    }

    fn current_back_buffer_index(&self, swap_chain: &IDXGISwapChain3) -> u32 {
        unsafe { swap_chain.GetCurrentBackBufferIndex() }
    }

    fn swap_chain_buffer(&self, swap_chain: &IDXGISwapChain3, index: u32) -> Result<ID3D12Resource, GpuError> {
        unsafe { swap_chain.GetBuffer(index) }.map_err(native("GetBuffer"))
    }

    fn present(&self, swap_chain: &IDXGISwapChain3, sync_interval: u32, flags: u32) -> Result<(), GpuError> {
        unsafe { swap_chain.Present(sync_interval, DXGI_PRESENT(flags)) }
            .ok()
            .map_err(native("Present"))
    }

    fn create_descriptor_heap(
        &self,
        device: &ID3D12Device,
        kind: HeapKind,
        capacity: u32,
    ) -> Result<ID3D12DescriptorHeap, GpuError> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(kind),
            NumDescriptors: capacity,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        unsafe { device.CreateDescriptorHeap(&desc) }.map_err(native("CreateDescriptorHeap"))
    }

    fn heap_start(&self, heap: &ID3D12DescriptorHeap) -> CpuDescriptorHandle {
        CpuDescriptorHandle(unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr)
    }

    fn descriptor_increment(&self, device: &ID3D12Device, kind: HeapKind) -> u32 {
        unsafe { device.GetDescriptorHandleIncrementSize(heap_type(kind)) }
    }

    fn create_render_target_view(
        &self,
        device: &ID3D12Device,
        resource: &ID3D12Resource,
        format: Format,
        handle: CpuDescriptorHandle,
    ) {
        let desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: dxgi_format(format),
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        };
        unsafe {
            device.CreateRenderTargetView(
                resource,
                Some(&desc),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 },
            )
        };
    }

    fn create_command_allocator(&self, device: &ID3D12Device) -> Result<ID3D12CommandAllocator, GpuError> {
        unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
            .map_err(native("CreateCommandAllocator"))
    }

    fn create_command_list(
        &self,
        device: &ID3D12Device,
        allocator: &ID3D12CommandAllocator,
    ) -> Result<ID3D12GraphicsCommandList, GpuError> {
        let list: ID3D12GraphicsCommandList =
            unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator, None) }
                .map_err(native("CreateCommandList"))?;
        // Lists are created open; the recorder expects them closed.
        unsafe { list.Close() }.map_err(native("ID3D12GraphicsCommandList::Close"))?;
        Ok(list)
    }

    fn reset_allocator(&self, allocator: &ID3D12CommandAllocator) -> Result<(), GpuError> {
        unsafe { allocator.Reset() }.map_err(native("ID3D12CommandAllocator::Reset"))
    }

    fn reset_command_list(
        &self,
        list: &ID3D12GraphicsCommandList,
        allocator: &ID3D12CommandAllocator,
    ) -> Result<(), GpuError> {
        unsafe { list.Reset(allocator, None) }.map_err(native("ID3D12GraphicsCommandList::Reset"))
    }

    fn resource_barrier(
        &self,
        list: &ID3D12GraphicsCommandList,
        resource: &ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let barrier = D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    // Borrowed without AddRef; `resource` outlives the call.
                    pResource: unsafe { std::mem::transmute_copy(resource) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: resource_state(before),
                    StateAfter: resource_state(after),
                }),
            },
        };
        unsafe { list.ResourceBarrier(&[barrier]) };
    }

    fn clear_render_target(
        &self,
        list: &ID3D12GraphicsCommandList,
        handle: CpuDescriptorHandle,
        color: ClearColor,
    ) {
        unsafe {
            list.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 }, &color.0, None)
        };
    }

    fn close_command_list(&self, list: &ID3D12GraphicsCommandList) -> Result<(), GpuError> {
        unsafe { list.Close() }.map_err(native("ID3D12GraphicsCommandList::Close"))
    }

    fn execute(&self, queue: &ID3D12CommandQueue, list: &ID3D12GraphicsCommandList) {
        let lists: [Option<ID3D12CommandList>; 1] = [Some(list.clone().into())];
        unsafe { queue.ExecuteCommandLists(&lists) };
    }

    fn create_fence(&self, device: &ID3D12Device, initial: u64) -> Result<ID3D12Fence, GpuError> {
        unsafe { device.CreateFence(initial, D3D12_FENCE_FLAG_NONE) }.map_err(native("CreateFence"))
    }

    fn create_event(&self) -> Result<FenceEvent, GpuError> {
        let handle = unsafe { CreateEventA(None, false, false, None) }.map_err(native("CreateEventA"))?;
        Ok(FenceEvent(handle))
    }

    fn signal(&self, queue: &ID3D12CommandQueue, fence: &ID3D12Fence, value: u64) -> Result<(), GpuError> {
        unsafe { queue.Signal(fence, value) }.map_err(native("ID3D12CommandQueue::Signal"))
    }

    fn completed_value(&self, fence: &ID3D12Fence) -> u64 {
        unsafe { fence.GetCompletedValue() }
    }

    fn wait_for_value(
        &self,
        device: &ID3D12Device,
        fence: &ID3D12Fence,
        value: u64,
        event: &FenceEvent,
    ) -> Result<(), GpuError> {
        unsafe { fence.SetEventOnCompletion(value, event.0) }
            .map_err(native("SetEventOnCompletion"))?;

        let waited = unsafe { WaitForSingleObject(event.0, INFINITE) };

        // Removal signals every fence, so check it before trusting the wake-up.
        if let Some(reason) = self.device_removed_reason(device) {
            return Err(GpuError::DeviceLost { reason });
        }
        if waited != WAIT_OBJECT_0 {
            return Err(GpuError::native(
                "WaitForSingleObject",
                format!("unexpected wait result {:#x}", waited.0),
            ));
        }
        Ok(())
    }

    fn device_removed_reason(&self, device: &ID3D12Device) -> Option<String> {
        unsafe { device.GetDeviceRemovedReason() }
            .err()
            .map(|e| e.to_string())
    }
}
