//! Lock-free run state cell.

use std::sync::atomic::{AtomicU8, Ordering};

use stepwise_core::RunState;

/// Holds the current [`RunState`] as an atomic byte.
///
/// The only transition out of `Idle` is [`try_start`](Self::try_start), so
/// concurrent `run()` calls race on one compare-and-swap.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Idle → Running`. Fails if any run is active or finishing.
    pub(crate) fn try_start(&self) -> bool {
        self.0
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move between active states. No effect once cancelled or finished.
    pub(crate) fn advance(&self, to: RunState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                RunState::from_u8(current).is_active().then_some(to as u8)
            })
            .is_ok()
    }

    /// Active → `Cancelled`. Returns false if nothing was running.
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.advance(RunState::Cancelled)
    }

    pub(crate) fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
