use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{RunId, RunResult};

/// Keeps the result of the newest run.
///
/// A run that started before the current newest one can still finish, but
/// its result is refused so it never replaces a newer one.
#[derive(Debug, Default)]
pub struct RunLedger {
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    newest: Option<RunId>,
    latest: Option<RunResult>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, run_id: RunId) {
        let mut state = self.lock();
        if state.newest.map_or(true, |newest| run_id > newest) {
            state.newest = Some(run_id);
        }
    }

    /// Records `result` unless a newer run has started since. Returns
    /// whether the result was kept.
    pub fn commit(&self, result: &RunResult) -> bool {
        let mut state = self.lock();
        if state.newest.is_some_and(|newest| result.run_id < newest) {
            return false;
        }
        state.latest = Some(result.clone());
        true
    }

    pub fn newest(&self) -> Option<RunId> {
        self.lock().newest
    }

    pub fn latest(&self) -> Option<RunResult> {
        self.lock().latest.clone()
    }

    /// Forgets the kept result. Runs still in flight stay refusable.
    pub fn clear(&self) {
        self.lock().latest = None;
    }
}
