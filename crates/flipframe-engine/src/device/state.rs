use super::GpuError;
use crate::hal::ResourceState;

/// A validated state change, ready to be recorded as a barrier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Transition {
    pub before: ResourceState,
    pub after: ResourceState,
}

/// CPU-side record of the state a resource will be in once all recorded
/// barriers have executed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TrackedState {
    current: ResourceState,
}

impl TrackedState {
    pub fn new(initial: ResourceState) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> ResourceState {
        self.current
    }

    /// Moves from `from` to `to`.
    ///
    /// `from` must match the tracked state and differ from `to`; on error the
    /// tracked state is unchanged.
    pub fn transition(
        &mut self,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<Transition, GpuError> {
        if from != self.current {
            return Err(GpuError::StateMismatch {
                expected: from,
                actual: self.current,
            });
        }
        if from == to {
            return Err(GpuError::RedundantTransition(to));
        }

        self.current = to;
        Ok(Transition {
            before: from,
            after: to,
        })
    }
}
