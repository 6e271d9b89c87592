//! Per-window exposure accounting.
//!
//! Every entry must first reserve its notional here. The check and the
//! reserve happen under one lock, so two concurrent candidates can never
//! both pass a cap check that only has room for one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::RiskError;
use crate::models::{Direction, WindowId};

#[derive(Debug, Default)]
struct WindowCounts {
    long_entries: u32,
    short_entries: u32,
    total_entries: u32,
}

#[derive(Debug)]
struct LiveEntry {
    window: WindowId,
    side: Direction,
    notional: f64,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    live: HashMap<u64, LiveEntry>,
    /// Cumulative per-window entry counts; never decremented.
    counts: HashMap<i64, WindowCounts>,
    last_entry_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn committed(&self, window: WindowId) -> f64 {
        self.live
            .values()
            .filter(|e| e.window == window)
            .map(|e| e.notional)
            .sum()
    }

    fn has_side(&self, window: WindowId, side: Direction) -> bool {
        self.live
            .values()
            .any(|e| e.window == window && e.side == side)
    }
}

/// Shared, lock-protected exposure state. Cloning shares the ledger.
#[derive(Debug, Clone)]
pub struct ExposureLedger {
    inner: Arc<Mutex<Inner>>,
    cap: f64,
    cooldown_secs: i64,
    max_same_direction: u32,
    max_trades_per_window: u32,
}

impl ExposureLedger {
    pub fn new(
        cap: f64,
        cooldown_secs: i64,
        max_same_direction: u32,
        max_trades_per_window: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            cap,
            cooldown_secs,
            max_same_direction,
            max_trades_per_window,
        }
    }

    /// Atomically check every entry constraint and reserve the notional.
    /// The returned reservation must be released when the position closes
    /// or the entry fails.
    pub fn reserve(
        &self,
        window: WindowId,
        side: Direction,
        notional: f64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, RiskError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(last) = inner.last_entry_at {
            let elapsed = (now - last).num_seconds();
            if elapsed < self.cooldown_secs {
                return Err(RiskError::Cooldown(elapsed));
            }
        }

        let counts = inner.counts.entry(window.0).or_default();
        if counts.total_entries >= self.max_trades_per_window {
            return Err(RiskError::WindowTradeLimit(self.max_trades_per_window));
        }
        let same_direction = match side {
            Direction::Long => counts.long_entries,
            Direction::Short => counts.short_entries,
        };
        if same_direction >= self.max_same_direction {
            return Err(RiskError::WindowTradeLimit(self.max_same_direction));
        }

        if inner.has_side(window, side.opposite()) {
            return Err(RiskError::OppositeSideConflict);
        }

        let committed = inner.committed(window);
        if committed + notional > self.cap {
            return Err(RiskError::ExposureExceeded {
                committed,
                requested: notional,
                cap: self.cap,
            });
        }

        Ok(self.insert(&mut inner, window, side, notional, Some(now)))
    }

    /// Re-establish a reservation for a position loaded from the store at
    /// startup. Skips the entry checks: the position already exists.
    pub fn restore(&self, window: WindowId, side: Direction, notional: f64) -> Reservation {
        let mut inner = self.inner.lock().unwrap();
        self.insert(&mut inner, window, side, notional, None)
    }

    fn insert(
        &self,
        inner: &mut Inner,
        window: WindowId,
        side: Direction,
        notional: f64,
        entered_at: Option<DateTime<Utc>>,
    ) -> Reservation {
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(
            id,
            LiveEntry {
                window,
                side,
                notional,
            },
        );
        let counts = inner.counts.entry(window.0).or_default();
        counts.total_entries += 1;
        match side {
            Direction::Long => counts.long_entries += 1,
            Direction::Short => counts.short_entries += 1,
        }
        if let Some(now) = entered_at {
            inner.last_entry_at = Some(now);
        }
        Reservation {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Notional currently committed in a window (OPEN and CLOSING).
    pub fn committed(&self, window: WindowId) -> f64 {
        self.inner.lock().unwrap().committed(window)
    }
}

/// Handle to one reserved slice of the cap. The slice is returned when
/// the handle drops, so an error path that bails out with `?` cannot
/// leak committed notional; `release` consumes the handle where the
/// return is deliberate.
#[derive(Debug)]
pub struct Reservation {
    id: u64,
    inner: Arc<Mutex<Inner>>,
}

impl Reservation {
    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.inner.lock().unwrap().live.remove(&self.id);
    }
}
