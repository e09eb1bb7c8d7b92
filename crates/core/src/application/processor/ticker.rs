// Coalescing tick guard
//
// A trigger during an in-flight tick sets `requested`; the tick re-runs once
// when it finishes. Any number of such triggers collapses into one re-run.

use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct TickState {
    ticking: bool,
    requested: bool,
}

#[derive(Default)]
pub struct TickGuard {
    state: Mutex<TickState>,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TickState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if the caller now owns the tick; false if one is in flight
    /// (the request is recorded instead)
    pub fn try_begin(&self) -> bool {
        let mut state = self.lock();
        if state.ticking {
            state.requested = true;
            false
        } else {
            state.ticking = true;
            true
        }
    }

    /// Called by the owner after each tick. True means run once more.
    pub fn finish(&self) -> bool {
        let mut state = self.lock();
        if state.requested {
            state.requested = false;
            true
        } else {
            state.ticking = false;
            false
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.lock().ticking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_guard_starts_tick() {
        let guard = TickGuard::new();
        assert!(guard.try_begin());
        assert!(guard.is_ticking());
        assert!(!guard.finish());
        assert!(!guard.is_ticking());
    }

    #[test]
    fn test_many_triggers_coalesce_into_one_rerun() {
        let guard = TickGuard::new();
        assert!(guard.try_begin());
        for _ in 0..10 {
            assert!(!guard.try_begin());
        }

        assert!(guard.finish()); // one follow-up
        assert!(!guard.finish()); // not ten
        assert!(guard.try_begin());
    }

    #[test]
    fn test_trigger_during_rerun_is_not_lost() {
        let guard = TickGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(guard.finish());

        // Re-run in flight, another trigger arrives
        assert!(!guard.try_begin());
        assert!(guard.finish());
        assert!(!guard.finish());
    }
}
