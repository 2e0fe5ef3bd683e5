use super::GpuError;
use crate::hal::{Backend, CpuDescriptorHandle, HeapKind};

/// Fixed-capacity descriptor heap with a forward-only cursor.
///
/// Slots are handed out in order and never freed. The slot address is
/// `start + used * increment`, where the increment is queried from the
/// device rather than assumed.
#[derive(Debug)]
pub struct DescriptorHeap<H> {
    raw: H,
    kind: HeapKind,
    capacity: u32,
    used: u32,
    start: CpuDescriptorHandle,
    increment: u32,
}

impl<H> DescriptorHeap<H> {
    /// Wraps an already created native heap.
    pub fn from_raw(
        raw: H,
        kind: HeapKind,
        capacity: u32,
        start: CpuDescriptorHandle,
        increment: u32,
    ) -> Self {
        Self {
            raw,
            kind,
            capacity,
            used: 0,
            start,
            increment,
        }
    }

    /// Reserves the next slot.
    ///
    /// Fails with `HeapExhausted` once every slot is taken; the cursor does
    /// not move on failure.
    pub fn allocate(&mut self) -> Result<CpuDescriptorHandle, GpuError> {
        if self.used >= self.capacity {
            return Err(GpuError::HeapExhausted {
                kind: self.kind,
                capacity: self.capacity,
            });
        }

        let handle = self
            .start
            .offset(self.used as usize * self.increment as usize);
        self.used += 1;
        Ok(handle)
    }

    pub fn raw(&self) -> &H {
        &self.raw
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used_entries(&self) -> u32 {
        self.used
    }

    pub fn start(&self) -> CpuDescriptorHandle {
        self.start
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }
}

/// Creates a native heap of `kind` and wraps it.
pub fn create_heap<B: Backend>(
    backend: &B,
    device: &B::Device,
    kind: HeapKind,
    capacity: u32,
) -> Result<DescriptorHeap<B::DescriptorHeap>, GpuError> {
    let raw = backend.create_descriptor_heap(device, kind, capacity)?;
    let start = backend.heap_start(&raw);
    let increment = backend.descriptor_increment(device, kind);
    log::debug!("{kind} heap: {capacity} slots, stride {increment} bytes");
    Ok(DescriptorHeap::from_raw(raw, kind, capacity, start, increment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(capacity: u32, increment: u32) -> DescriptorHeap<()> {
        DescriptorHeap::from_raw(
            (),
            HeapKind::RenderTargetView,
            capacity,
            CpuDescriptorHandle(0x4000),
            increment,
        )
    }

    #[test]
    fn nth_slot_is_start_plus_n_increments() {
        let mut h = heap(3, 48);
        for n in 0..3 {
            let handle = h.allocate().unwrap();
            assert_eq!(handle, CpuDescriptorHandle(0x4000 + n * 48));
        }
        assert_eq!(h.used_entries(), 3);
    }

    #[test]
    fn allocation_past_capacity_is_rejected() {
        let mut h = heap(3, 32);
        for _ in 0..3 {
            h.allocate().unwrap();
        }
        let err = h.allocate().unwrap_err();
        assert_eq!(
            err,
            GpuError::HeapExhausted {
                kind: HeapKind::RenderTargetView,
                capacity: 3,
            }
        );
        assert_eq!(h.used_entries(), 3);

        // Stays exhausted; never wraps to slot 0.
        assert!(h.allocate().is_err());
        assert_eq!(h.used_entries(), 3);
    }

    #[test]
    fn increment_comes_from_device() {
        use crate::hal::headless::{Headless, HeadlessConfig};

        let backend = Headless::new(HeadlessConfig {
            rtv_increment: 64,
            ..Default::default()
        });
        let adapter = backend.enumerate_adapter(0).unwrap().unwrap();
        let device = backend
            .create_device(&adapter, crate::hal::FeatureLevel::Level12_0)
            .unwrap();

        let mut h = create_heap(&backend, &device, HeapKind::RenderTargetView, 2).unwrap();
        let a = h.allocate().unwrap();
        let b = h.allocate().unwrap();
        assert_eq!(b.0 - a.0, 64);
        assert_eq!(a, h.start());
    }
}
