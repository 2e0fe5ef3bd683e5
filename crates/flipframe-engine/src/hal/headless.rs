//! In-process simulation of the native graphics API.
//!
//! The simulator keeps the parts of driver behavior the engine depends on:
//! - adapters with software flags and feature levels
//! - per-kind descriptor increments and disjoint heap address ranges
//! - resource states checked against every barrier, clear and present
//! - a single in-order queue whose fence values complete either at signal
//!   time or only while the CPU waits
//! - device removal, after which completed values read `u64::MAX`
//!
//! Contract violations never fail the call that caused them; like a debug
//! layer they are collected as validation messages for tests to inspect.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    AdapterInfo, Backend, ClearColor, CpuDescriptorHandle, FeatureLevel, Format, HeapKind,
    ResourceState, SwapChainDesc,
};
use crate::device::GpuError;

/// When submitted work completes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Latency {
    /// Work executes as soon as it is submitted.
    Immediate,
    /// Work executes only while the CPU waits, or on `Headless::flush`.
    Deferred,
}

/// A simulated physical adapter.
#[derive(Debug, Clone)]
pub struct HeadlessAdapter {
    pub description: String,
    pub software: bool,
    pub max_feature_level: FeatureLevel,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
}

impl HeadlessAdapter {
    pub fn hardware(description: &str, max_feature_level: FeatureLevel) -> Self {
        Self {
            description: description.to_string(),
            software: false,
            max_feature_level,
            vendor_id: 0x10de,
            device_id: 0x2684,
            dedicated_video_memory: 8 << 30,
        }
    }

    pub fn software(description: &str) -> Self {
        Self {
            description: description.to_string(),
            software: true,
            max_feature_level: FeatureLevel::Level12_1,
            vendor_id: 0x1414,
            device_id: 0x008c,
            dedicated_video_memory: 0,
        }
    }
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub adapters: Vec<HeadlessAdapter>,
    /// Highest feature level the platform runtime can create at all.
    pub platform_level: FeatureLevel,
    pub debug_layer_available: bool,
    pub rtv_increment: u32,
    pub dsv_increment: u32,
    pub srv_increment: u32,
    pub latency: Latency,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            adapters: vec![
                HeadlessAdapter::hardware("Headless GPU", FeatureLevel::Level12_1),
                HeadlessAdapter::software("Microsoft Basic Render Driver"),
            ],
            platform_level: FeatureLevel::Level12_2,
            debug_layer_available: true,
            rtv_increment: 32,
            dsv_increment: 8,
            srv_increment: 32,
            latency: Latency::Immediate,
        }
    }
}

/// A frame the simulated compositor displayed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PresentedFrame {
    pub buffer_index: u32,
    /// Last color cleared into the buffer, if any.
    pub color: Option<ClearColor>,
    pub flags: u32,
}

/// Handle to the simulation. Clones share the same simulated GPU.
#[derive(Debug, Clone)]
pub struct Headless {
    sim: Arc<Mutex<Sim>>,
    live: Arc<AtomicU64>,
}

/// Keeps the live-object count accurate across drops.
#[derive(Debug)]
struct Live(Arc<AtomicU64>);

impl Live {
    fn new(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimAdapter {
    index: u32,
    _live: Live,
}

#[derive(Debug)]
pub struct SimDevice {
    _live: Live,
}

#[derive(Debug)]
pub struct SimQueue {
    _live: Live,
}

#[derive(Debug)]
pub struct SimSwapChain {
    id: u64,
    _live: Live,
}

#[derive(Debug)]
pub struct SimHeap {
    base: usize,
    _live: Live,
}

#[derive(Debug)]
pub struct SimAllocator {
    id: u64,
    _live: Live,
}

impl SimAllocator {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
pub struct SimCommandList {
    id: u64,
    _live: Live,
}

#[derive(Debug)]
pub struct SimResource {
    id: u64,
    _live: Live,
}

impl SimResource {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
pub struct SimFence {
    id: u64,
    _live: Live,
}

#[derive(Debug)]
pub struct SimEvent {
    _live: Live,
}

#[derive(Debug, Clone)]
enum Command {
    Barrier {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        handle: CpuDescriptorHandle,
        color: ClearColor,
    },
}

#[derive(Debug)]
enum Work {
    Execute {
        allocator: u64,
        commands: Vec<Command>,
    },
    Signal {
        fence: u64,
        value: u64,
    },
    Present {
        buffer_index: u32,
        resource: u64,
        flags: u32,
    },
}

#[derive(Debug)]
struct Image {
    state: ResourceState,
    color: Option<ClearColor>,
}

#[derive(Debug, Default)]
struct ListState {
    open: bool,
    allocator: Option<u64>,
    commands: Vec<Command>,
}

#[derive(Debug)]
struct Chain {
    buffers: Vec<u64>,
    current: u32,
}

#[derive(Debug)]
struct Sim {
    config: HeadlessConfig,
    calls: u64,
    next_id: u64,
    next_heap_base: usize,
    debug_layer: bool,
    removed: Option<String>,
    remove_on_wait: Option<String>,
    heaps: Vec<(usize, usize)>,
    images: HashMap<u64, Image>,
    views: HashMap<CpuDescriptorHandle, u64>,
    lists: HashMap<u64, ListState>,
    fences: HashMap<u64, u64>,
    chains: HashMap<u64, Chain>,
    last_chain: Option<u64>,
    pending: VecDeque<Work>,
    presented: Vec<PresentedFrame>,
    validation: Vec<String>,
}

impl Sim {
    fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            calls: 0,
            next_id: 1,
            next_heap_base: 0x1_0000,
            debug_layer: false,
            removed: None,
            remove_on_wait: None,
            heaps: Vec::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            lists: HashMap::new(),
            fences: HashMap::new(),
            chains: HashMap::new(),
            last_chain: None,
            pending: VecDeque::new(),
            presented: Vec::new(),
            validation: Vec::new(),
        }
    }

    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn increment(&self, kind: HeapKind) -> u32 {
        match kind {
            HeapKind::RenderTargetView => self.config.rtv_increment,
            HeapKind::DepthStencilView => self.config.dsv_increment,
            HeapKind::ShaderResourceView => self.config.srv_increment,
        }
    }

    fn invalid(&mut self, message: String) {
        log::warn!("headless validation: {message}");
        self.validation.push(message);
    }

    fn submit(&mut self, work: Work) {
        self.pending.push_back(work);
        if self.config.latency == Latency::Immediate {
            self.drain();
        }
    }

    fn drain(&mut self) {
        while let Some(work) = self.pending.pop_front() {
            self.process(work);
        }
    }

    /// Fails the way a driver does once the device is gone: with a plain
    /// call error that only `device_removed_reason` explains.
    fn check_removed(&self, call: &'static str) -> Result<(), GpuError> {
        match self.removed {
            Some(_) => Err(GpuError::native(call, "DXGI_ERROR_DEVICE_REMOVED")),
            None => Ok(()),
        }
    }

    fn lose(&mut self, reason: String) {
        log::debug!("headless device removed: {reason}");
        self.removed = Some(reason);
        self.pending.clear();
    }

    fn process(&mut self, work: Work) {
        match work {
            Work::Execute { commands, .. } => {
                for command in commands {
                    self.replay(command);
                }
            }
            Work::Signal { fence, value } => {
                self.fences.insert(fence, value);
            }
            Work::Present {
                buffer_index,
                resource,
                flags,
            } => {
                let (state, color) = match self.images.get(&resource) {
                    Some(image) => (image.state, image.color),
                    None => return,
                };
                if state != ResourceState::Present {
                    self.invalid(format!(
                        "presented buffer {buffer_index} while in {state} state"
                    ));
                }
                self.presented.push(PresentedFrame {
                    buffer_index,
                    color,
                    flags,
                });
            }
        }
    }

    fn replay(&mut self, command: Command) {
        match command {
            Command::Barrier {
                resource,
                before,
                after,
            } => {
                let Some(image) = self.images.get_mut(&resource) else {
                    self.invalid(format!("barrier on unknown resource {resource}"));
                    return;
                };
                let actual = image.state;
                image.state = after;
                if actual != before {
                    self.invalid(format!(
                        "barrier declared {before} -> {after} but resource {resource} was {actual}"
                    ));
                }
            }
            Command::Clear { handle, color } => {
                let Some(resource) = self.views.get(&handle).copied() else {
                    self.invalid(format!("clear through unwritten descriptor {:#x}", handle.0));
                    return;
                };
                let Some(image) = self.images.get_mut(&resource) else {
                    return;
                };
                image.color = Some(color);
                let state = image.state;
                if state != ResourceState::RenderTarget {
                    self.invalid(format!("cleared resource {resource} while in {state} state"));
                }
            }
        }
    }
}

impl Headless {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            sim: Arc::new(Mutex::new(Sim::new(config))),
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    fn sim(&self) -> MutexGuard<'_, Sim> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the simulation and counts one native call.
    fn call(&self) -> MutexGuard<'_, Sim> {
        let mut sim = self.sim();
        sim.calls += 1;
        sim
    }

    fn live(&self) -> Live {
        Live::new(&self.live)
    }

    /// Number of native calls issued so far.
    pub fn calls(&self) -> u64 {
        self.sim().calls
    }

    /// Number of native objects currently alive.
    pub fn live_objects(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    pub fn debug_layer_enabled(&self) -> bool {
        self.sim().debug_layer
    }

    /// Frames displayed so far, oldest first.
    pub fn presented(&self) -> Vec<PresentedFrame> {
        self.sim().presented.clone()
    }

    /// Contract violations observed so far.
    pub fn validation_messages(&self) -> Vec<String> {
        self.sim().validation.clone()
    }

    /// Actual GPU-side states of the newest swap chain's buffers.
    pub fn back_buffer_states(&self) -> Vec<ResourceState> {
        let sim = self.sim();
        let Some(chain) = sim.last_chain.and_then(|id| sim.chains.get(&id)) else {
            return Vec::new();
        };
        chain
            .buffers
            .iter()
            .filter_map(|id| sim.images.get(id).map(|image| image.state))
            .collect()
    }

    /// Number of submitted operations the GPU has not executed yet.
    pub fn pending_work(&self) -> usize {
        self.sim().pending.len()
    }

    /// Removes the device immediately.
    pub fn remove_device(&self, reason: &str) {
        self.sim().lose(reason.to_string());
    }

    /// Removes the device while the CPU is blocked in the next wait.
    pub fn remove_device_during_next_wait(&self, reason: &str) {
        self.sim().remove_on_wait = Some(reason.to_string());
    }
}

impl Default for Headless {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl Backend for Headless {
    type Adapter = SimAdapter;
    type Device = SimDevice;
    type Queue = SimQueue;
    type SwapChain = SimSwapChain;
    type DescriptorHeap = SimHeap;
    type CommandAllocator = SimAllocator;
    type CommandList = SimCommandList;
    type Resource = SimResource;
    type Fence = SimFence;
    type Event = SimEvent;

    fn is_supported(&self, level: FeatureLevel) -> bool {
        level <= self.call().config.platform_level
    }

    fn enable_debug_layer(&self) -> bool {
        let mut sim = self.call();
        sim.debug_layer = sim.config.debug_layer_available;
        sim.debug_layer
    }

    fn enumerate_adapter(&self, index: u32) -> Result<Option<SimAdapter>, GpuError> {
        let sim = self.call();
        if (index as usize) < sim.config.adapters.len() {
            Ok(Some(SimAdapter {
                index,
                _live: self.live(),
            }))
        } else {
            Ok(None)
        }
    }

    fn adapter_info(&self, adapter: &SimAdapter, index: u32) -> Result<AdapterInfo, GpuError> {
        let sim = self.call();
        let a = sim
            .config
            .adapters
            .get(adapter.index as usize)
            .ok_or_else(|| GpuError::native("GetDesc1", "adapter no longer present"))?;
        Ok(AdapterInfo {
            index,
            description: a.description.clone(),
            software: a.software,
            vendor_id: a.vendor_id,
            device_id: a.device_id,
            dedicated_video_memory: a.dedicated_video_memory,
        })
    }

    fn adapter_supports(&self, adapter: &SimAdapter, level: FeatureLevel) -> bool {
        let sim = self.call();
        sim.config
            .adapters
            .get(adapter.index as usize)
            .is_some_and(|a| level <= a.max_feature_level)
    }

    fn create_device(&self, adapter: &SimAdapter, level: FeatureLevel) -> Result<SimDevice, GpuError> {
        if !self.adapter_supports(adapter, level) {
            return Err(GpuError::native(
                "D3D12CreateDevice",
                format!("adapter {} cannot create a {level} device", adapter.index),
            ));
        }
        Ok(SimDevice { _live: self.live() })
    }

    fn create_queue(&self, _device: &SimDevice) -> Result<SimQueue, GpuError> {
        self.call();
        Ok(SimQueue { _live: self.live() })
    }

    fn create_swap_chain(&self, _queue: &SimQueue, desc: &SwapChainDesc) -> Result<SimSwapChain, GpuError> {
        let mut sim = self.call();
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::DegenerateSurface {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.format.is_srgb() {
            return Err(GpuError::native(
                "CreateSwapChainForHwnd",
                format!("{:?} is not a flip-model storage format", desc.format),
            ));
        }
        if !(2..=16).contains(&desc.buffer_count) {
            return Err(GpuError::native(
                "CreateSwapChainForHwnd",
                format!("flip model needs 2..=16 buffers, got {}", desc.buffer_count),
            ));
        }

        let mut buffers = Vec::with_capacity(desc.buffer_count as usize);
        for _ in 0..desc.buffer_count {
            let id = sim.id();
            sim.images.insert(
                id,
                Image {
                    state: ResourceState::Present,
                    color: None,
                },
            );
            buffers.push(id);
        }

        let id = sim.id();
        sim.chains.insert(id, Chain { buffers, current: 0 });
        sim.last_chain = Some(id);
        Ok(SimSwapChain {
            id,
            _live: self.live(),
        })
    }

    fn current_back_buffer_index(&self, swap_chain: &SimSwapChain) -> u32 {
        let sim = self.call();
        sim.chains.get(&swap_chain.id).map_or(0, |c| c.current)
    }

    fn swap_chain_buffer(&self, swap_chain: &SimSwapChain, index: u32) -> Result<SimResource, GpuError> {
        let sim = self.call();
        let id = sim
            .chains
            .get(&swap_chain.id)
            .and_then(|c| c.buffers.get(index as usize).copied())
            .ok_or_else(|| GpuError::native("GetBuffer", format!("no buffer at index {index}")))?;
        Ok(SimResource {
            id,
            _live: self.live(),
        })
    }

    fn present(&self, swap_chain: &SimSwapChain, _sync_interval: u32, flags: u32) -> Result<(), GpuError> {
        let mut sim = self.call();
        if let Some(reason) = sim.removed.clone() {
            return Err(GpuError::DeviceLost { reason });
        }
        let Some(chain) = sim.chains.get_mut(&swap_chain.id) else {
            return Err(GpuError::native("Present", "unknown swap chain"));
        };
        let buffer_index = chain.current;
        let resource = chain.buffers[buffer_index as usize];
        chain.current = (chain.current + 1) % chain.buffers.len() as u32;
        sim.submit(Work::Present {
            buffer_index,
            resource,
            flags,
        });
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        _device: &SimDevice,
        kind: HeapKind,
        capacity: u32,
    ) -> Result<SimHeap, GpuError> {
        let mut sim = self.call();
        if capacity == 0 {
            return Err(GpuError::native("CreateDescriptorHeap", "zero descriptors"));
        }
        let base = sim.next_heap_base;
        let len = capacity as usize * sim.increment(kind) as usize;
        // Leave a gap so neighbouring heaps never look contiguous.
        sim.next_heap_base = (base + len + 0xffff) & !0xffff;
        sim.heaps.push((base, base + len));
        Ok(SimHeap {
            base,
            _live: self.live(),
        })
    }

    fn heap_start(&self, heap: &SimHeap) -> CpuDescriptorHandle {
        self.call();
        CpuDescriptorHandle(heap.base)
    }

    fn descriptor_increment(&self, _device: &SimDevice, kind: HeapKind) -> u32 {
        self.call().increment(kind)
    }

    fn create_render_target_view(
        &self,
        _device: &SimDevice,
        resource: &SimResource,
        format: Format,
        handle: CpuDescriptorHandle,
    ) {
        let mut sim = self.call();
        let inside = sim
            .heaps
            .iter()
            .any(|&(start, end)| handle.0 >= start && handle.0 < end);
        if !inside {
            sim.invalid(format!("render target view written outside any heap at {:#x}", handle.0));
            return;
        }
        if !format.is_srgb() {
            log::trace!("headless: linear render target view at {:#x}", handle.0);
        }
        sim.views.insert(handle, resource.id);
    }

    fn create_command_allocator(&self, _device: &SimDevice) -> Result<SimAllocator, GpuError> {
        let mut sim = self.call();
        let id = sim.id();
        Ok(SimAllocator {
            id,
            _live: self.live(),
        })
    }

    fn create_command_list(&self, _device: &SimDevice, _allocator: &SimAllocator) -> Result<SimCommandList, GpuError> {
        let mut sim = self.call();
        let id = sim.id();
        sim.lists.insert(id, ListState::default());
        Ok(SimCommandList {
            id,
            _live: self.live(),
        })
    }

    fn reset_allocator(&self, allocator: &SimAllocator) -> Result<(), GpuError> {
        let mut sim = self.call();
        sim.check_removed("ID3D12CommandAllocator::Reset")?;
        let in_flight = sim.pending.iter().any(|w| {
            matches!(w, Work::Execute { allocator: a, .. } if *a == allocator.id)
        });
        if in_flight {
            sim.invalid(format!(
                "command allocator {} reset while its commands are in flight",
                allocator.id
            ));
        }
        let recording = sim
            .lists
            .values()
            .any(|l| l.open && l.allocator == Some(allocator.id));
        if recording {
            return Err(GpuError::native(
                "ID3D12CommandAllocator::Reset",
                "a command list is still recording into the allocator",
            ));
        }
        Ok(())
    }

    fn reset_command_list(&self, list: &SimCommandList, allocator: &SimAllocator) -> Result<(), GpuError> {
        let mut sim = self.call();
        sim.check_removed("ID3D12GraphicsCommandList::Reset")?;
        let state = sim.lists.entry(list.id).or_default();
        if state.open {
            return Err(GpuError::native(
                "ID3D12GraphicsCommandList::Reset",
                "command list is still open",
            ));
        }
        state.open = true;
        state.allocator = Some(allocator.id);
        state.commands.clear();
        Ok(())
    }

    fn resource_barrier(
        &self,
        list: &SimCommandList,
        resource: &SimResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let mut sim = self.call();
        let open = sim.lists.get(&list.id).is_some_and(|l| l.open);
        if !open {
            sim.invalid("barrier recorded into a closed command list".to_string());
            return;
        }
        if let Some(state) = sim.lists.get_mut(&list.id) {
            state.commands.push(Command::Barrier {
                resource: resource.id,
                before,
                after,
            });
        }
    }

    fn clear_render_target(&self, list: &SimCommandList, handle: CpuDescriptorHandle, color: ClearColor) {
        let mut sim = self.call();
        let open = sim.lists.get(&list.id).is_some_and(|l| l.open);
        if !open {
            sim.invalid("clear recorded into a closed command list".to_string());
            return;
        }
        if let Some(state) = sim.lists.get_mut(&list.id) {
            state.commands.push(Command::Clear { handle, color });
        }
    }

    fn close_command_list(&self, list: &SimCommandList) -> Result<(), GpuError> {
        let mut sim = self.call();
        let removed = sim.check_removed("ID3D12GraphicsCommandList::Close");
        match sim.lists.get_mut(&list.id) {
            Some(state) if state.open => {
                state.open = false;
                removed
            }
            _ => Err(GpuError::native(
                "ID3D12GraphicsCommandList::Close",
                "command list is not recording",
            )),
        }
    }

    fn execute(&self, _queue: &SimQueue, list: &SimCommandList) {
        let mut sim = self.call();
        if sim.removed.is_some() {
            return;
        }
        let (open, allocator, commands) = match sim.lists.get(&list.id) {
            Some(l) => (l.open, l.allocator.unwrap_or(0), l.commands.clone()),
            None => return,
        };
        if open {
            sim.invalid("executed a command list that was never closed".to_string());
            return;
        }
        sim.submit(Work::Execute {
            allocator,
            commands,
        });
    }

    fn create_fence(&self, _device: &SimDevice, initial: u64) -> Result<SimFence, GpuError> {
        let mut sim = self.call();
        let id = sim.id();
        sim.fences.insert(id, initial);
        Ok(SimFence {
            id,
            _live: self.live(),
        })
    }

    fn create_event(&self) -> Result<SimEvent, GpuError> {
        self.call();
        Ok(SimEvent { _live: self.live() })
    }

    fn signal(&self, _queue: &SimQueue, fence: &SimFence, value: u64) -> Result<(), GpuError> {
        let mut sim = self.call();
        if let Some(reason) = sim.removed.clone() {
            return Err(GpuError::DeviceLost { reason });
        }
        sim.submit(Work::Signal {
            fence: fence.id,
            value,
        });
        Ok(())
    }

    fn completed_value(&self, fence: &SimFence) -> u64 {
        let sim = self.call();
        if sim.removed.is_some() {
            return u64::MAX;
        }
        sim.fences.get(&fence.id).copied().unwrap_or(0)
    }

    fn wait_for_value(
        &self,
        _device: &SimDevice,
        fence: &SimFence,
        value: u64,
        _event: &SimEvent,
    ) -> Result<(), GpuError> {
        let mut sim = self.call();
        if let Some(reason) = sim.remove_on_wait.take() {
            sim.lose(reason);
        }
        loop {
            if let Some(reason) = sim.removed.clone() {
                return Err(GpuError::DeviceLost { reason });
            }
            if sim.fences.get(&fence.id).copied().unwrap_or(0) >= value {
                return Ok(());
            }
            let Some(work) = sim.pending.pop_front() else {
                return Err(GpuError::native(
                    "WaitForSingleObject",
                    format!("fence can never reach {value}; nothing left in the queue"),
                ));
            };
            sim.process(work);
        }
    }

    fn device_removed_reason(&self, _device: &SimDevice) -> Option<String> {
        self.call().removed.clone()
    }
}
