use super::GpuError;
use crate::hal::Backend;

/// Monotonic fence plus the event the CPU blocks on.
///
/// Values start at 1 and grow by exactly 1 per signal. Work tagged with
/// value N is complete once the GPU-side completed value is >= N.
pub struct FenceSync<B: Backend> {
    fence: B::Fence,
    event: B::Event,
    last_signaled: u64,
}

impl<B: Backend> FenceSync<B> {
    pub fn new(backend: &B, device: &B::Device) -> Result<Self, GpuError> {
        let fence = backend.create_fence(device, 0)?;
        let event = backend.create_event()?;
        Ok(Self {
            fence,
            event,
            last_signaled: 0,
        })
    }

    /// Newest value handed to the queue.
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Value the GPU has reached.
    pub fn completed(&self, backend: &B) -> u64 {
        backend.completed_value(&self.fence)
    }

    /// Signals the next value on `queue` and returns it.
    pub fn signal(&mut self, backend: &B, queue: &B::Queue) -> Result<u64, GpuError> {
        let value = self.last_signaled + 1;
        backend.signal(queue, &self.fence, value)?;
        self.last_signaled = value;
        log::trace!("fence signal {value}");
        Ok(value)
    }

    /// Blocks until the GPU has reached `value`.
    ///
    /// Value 0 means "never submitted" and returns immediately. Waiting on a
    /// value that was never signaled is rejected instead of blocking forever.
    pub fn wait_until(&self, backend: &B, device: &B::Device, value: u64) -> Result<(), GpuError> {
        if value == 0 {
            return Ok(());
        }
        if value > self.last_signaled {
            return Err(GpuError::FenceNotSignaled {
                requested: value,
                last_signaled: self.last_signaled,
            });
        }

        if self.reached(backend, device, value)? {
            return Ok(());
        }

        log::trace!("fence wait {value}");
        backend.wait_for_value(device, &self.fence, value, &self.event)?;

        if self.reached(backend, device, value)? {
            Ok(())
        } else {
            Err(GpuError::native(
                "WaitForSingleObject",
                format!("woke before fence reached {value}"),
            ))
        }
    }

    fn reached(&self, backend: &B, device: &B::Device, value: u64) -> Result<bool, GpuError> {
        let completed = backend.completed_value(&self.fence);
        // A removed device reports every fence as complete.
        if completed == u64::MAX {
            if let Some(reason) = backend.device_removed_reason(device) {
                return Err(GpuError::DeviceLost { reason });
            }
        }
        Ok(completed >= value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::headless::{Headless, HeadlessConfig, Latency};
    use crate::hal::FeatureLevel;

    fn deferred() -> Headless {
        Headless::new(HeadlessConfig {
            latency: Latency::Deferred,
            ..Default::default()
        })
    }

    #[test]
    fn values_increase_by_one() {
        let h = Headless::default();
        let adapter = h.enumerate_adapter(0).unwrap().unwrap();
        let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let queue = h.create_queue(&device).unwrap();
        let mut sync = FenceSync::new(&h, &device).unwrap();

        let values: Vec<u64> = (0..5).map(|_| sync.signal(&h, &queue).unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(sync.last_signaled(), 5);
    }

    #[test]
    fn wait_returns_only_after_value_is_reached() {
        let h = deferred();
        let adapter = h.enumerate_adapter(0).unwrap().unwrap();
        let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let queue = h.create_queue(&device).unwrap();
        let mut sync = FenceSync::new(&h, &device).unwrap();

        sync.signal(&h, &queue).unwrap();
        sync.signal(&h, &queue).unwrap();
        sync.signal(&h, &queue).unwrap();
        assert_eq!(sync.completed(&h), 0);

        sync.wait_until(&h, &device, 2).unwrap();
        assert!(sync.completed(&h) >= 2);
        // In-order queue: value 3 has not been reached yet.
        assert_eq!(sync.completed(&h), 2);
    }

    #[test]
    fn waiting_on_unsignaled_value_is_rejected() {
        let h = Headless::default();
        let adapter = h.enumerate_adapter(0).unwrap().unwrap();
        let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let sync = FenceSync::new(&h, &device).unwrap();

        assert!(sync.wait_until(&h, &device, 0).is_ok());
        assert_eq!(
            sync.wait_until(&h, &device, 1),
            Err(GpuError::FenceNotSignaled {
                requested: 1,
                last_signaled: 0,
            })
        );
    }

    #[test]
    fn removal_during_wait_is_device_lost() {
        let h = deferred();
        let adapter = h.enumerate_adapter(0).unwrap().unwrap();
        let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let queue = h.create_queue(&device).unwrap();
        let mut sync = FenceSync::new(&h, &device).unwrap();

        let value = sync.signal(&h, &queue).unwrap();
        h.remove_device_during_next_wait("TDR");

        let err = sync.wait_until(&h, &device, value).unwrap_err();
        assert_eq!(
            err,
            GpuError::DeviceLost {
                reason: "TDR".into()
            }
        );
    }

    #[test]
    fn removed_device_is_not_mistaken_for_completion() {
        let h = deferred();
        let adapter = h.enumerate_adapter(0).unwrap().unwrap();
        let device = h.create_device(&adapter, FeatureLevel::Level12_0).unwrap();
        let queue = h.create_queue(&device).unwrap();
        let mut sync = FenceSync::new(&h, &device).unwrap();

        let value = sync.signal(&h, &queue).unwrap();
        h.remove_device("hung");
        assert_eq!(sync.completed(&h), u64::MAX);
        assert!(sync.wait_until(&h, &device, value).unwrap_err().is_device_lost());
    }
}
