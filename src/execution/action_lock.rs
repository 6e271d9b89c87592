//! Concurrency control for state-changing position work.
//!
//! Two rules: a bounded semaphore caps how many exchange actions run at
//! once, and a per-position token ensures at most one in-flight action
//! per position. A trigger that finds the token busy is dropped, never
//! queued; the next monitor cycle re-evaluates from fresh state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Clone)]
pub struct ActionGate {
    semaphore: Arc<Semaphore>,
    busy: Arc<Mutex<HashSet<i64>>>,
}

impl ActionGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Try to start an action for a position. `None` means either the
    /// position already has an action in flight or the global limit is
    /// reached; the caller drops the trigger.
    pub fn try_acquire(&self, position_id: i64) -> Option<ActionPermit> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(TryAcquireError::NoPermits) => {
                tracing::debug!("action gate saturated, dropping trigger for {}", position_id);
                return None;
            }
            Err(TryAcquireError::Closed) => return None,
        };

        let mut busy = self.busy.lock().unwrap();
        if !busy.insert(position_id) {
            tracing::debug!("position {} already has an action in flight", position_id);
            return None;
        }

        Some(ActionPermit {
            position_id,
            busy: self.busy.clone(),
            _permit: permit,
        })
    }
}

/// Held for the duration of one position action; releases both the
/// per-position token and the semaphore slot on drop.
pub struct ActionPermit {
    position_id: i64,
    busy: Arc<Mutex<HashSet<i64>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ActionPermit {
    fn drop(&mut self) {
        self.busy.lock().unwrap().remove(&self.position_id);
    }
}
