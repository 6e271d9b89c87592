//! Pre-trade risk gate.
//!
//! Five multiplicative factors shrink a base multiplier of 1.0 toward
//! zero; any factor may veto outright, and a final multiplier below the
//! floor is also a veto. The factors never enlarge a position.

use crate::models::{Direction, WindowId};

const EXTREME_OPPOSING_CVD: f64 = 300_000.0;
const OPPOSING_CVD_5M: f64 = 100_000.0;
const OPPOSING_CVD_1M: f64 = 50_000.0;

/// Everything the gate looks at for one candidate entry.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub direction: Direction,
    pub entry_price: f64,
    pub cvd_5m: f64,
    pub cvd_1m: f64,
    /// None when the window end time is unknown, which is itself a veto.
    pub seconds_remaining: Option<i64>,
    /// 0.50-crossings observed in the current window.
    pub cross_count: u32,
}

/// Gate output: the surviving multiplier plus an audit trail of every
/// factor that fired.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub multiplier: f64,
    pub veto: Option<String>,
    pub notes: Vec<String>,
}

impl GateVerdict {
    pub fn approved(&self) -> bool {
        self.veto.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RiskGate {
    pub floor: f64,
    pub min_seconds_remaining: i64,
    /// More than this much time left means the window is too young to read.
    pub early_entry_secs: i64,
}

impl Default for RiskGate {
    fn default() -> Self {
        Self {
            floor: 0.10,
            min_seconds_remaining: 180,
            early_entry_secs: 540,
        }
    }
}

impl RiskGate {
    pub fn new(floor: f64, min_seconds_remaining: i64, early_entry_secs: i64) -> Self {
        Self {
            floor,
            min_seconds_remaining,
            early_entry_secs,
        }
    }

    pub fn evaluate(&self, input: &RiskInput) -> GateVerdict {
        let mut multiplier = 1.0;
        let mut notes = Vec::new();
        let mut flow_disagrees = false;

        let veto = |reason: String| GateVerdict {
            multiplier: 0.0,
            veto: Some(reason),
            notes: Vec::new(),
        };

        // Factor 1: order flow disagreement
        let opposing_5m = opposes(input.direction, input.cvd_5m);
        let opposing_1m = opposes(input.direction, input.cvd_1m);

        if opposing_5m && input.cvd_5m.abs() > EXTREME_OPPOSING_CVD {
            return veto(format!("extreme opposing 5m CVD {:+.0}", input.cvd_5m));
        }
        if opposing_5m && input.cvd_5m.abs() > OPPOSING_CVD_5M {
            multiplier *= 0.3;
            flow_disagrees = true;
            notes.push(format!("opposing 5m CVD {:+.0} x0.3", input.cvd_5m));
        }
        if opposing_1m && input.cvd_1m.abs() > OPPOSING_CVD_1M {
            multiplier *= 0.6;
            flow_disagrees = true;
            notes.push(format!("opposing 1m CVD {:+.0} x0.6", input.cvd_1m));
        }

        // Factor 2: distance from the 0.50 reference
        let distance = (input.entry_price - 0.50).abs();
        if distance < 0.05 {
            multiplier *= 0.5;
            notes.push(format!("coin-flip zone ({:.3}) x0.5", input.entry_price));
        } else if distance < 0.10 {
            multiplier *= 0.7;
            notes.push(format!("near coin-flip ({:.3}) x0.7", input.entry_price));
        }

        // Factor 3: remaining window time
        match input.seconds_remaining {
            None => return veto("window end time unknown".to_string()),
            Some(secs) if secs < self.min_seconds_remaining => {
                return veto(format!(
                    "only {}s left (minimum {}s)",
                    secs, self.min_seconds_remaining
                ));
            }
            Some(secs) if secs > self.early_entry_secs => {
                multiplier *= 0.5;
                notes.push(format!("window too young ({}s left) x0.5", secs));
            }
            Some(_) => {}
        }

        // Factor 4: chaos filter on 0.50-crossings. A churning window that
        // also has opposing flow is untradable, not merely small.
        if input.cross_count > 5 {
            return veto(format!("{} crossings, chop", input.cross_count));
        }
        if input.cross_count > 3 {
            if flow_disagrees {
                return veto(format!(
                    "{} crossings with opposing flow",
                    input.cross_count
                ));
            }
            multiplier *= 0.5;
            notes.push(format!("{} crossings x0.5", input.cross_count));
        }

        // Factor 5: entry price attractiveness
        let price = input.entry_price;
        let price_factor = if price > 0.85 || price < 0.15 {
            0.2
        } else if price > 0.75 || price < 0.25 {
            0.3
        } else if price > 0.65 || price < 0.35 {
            0.6
        } else {
            1.0
        };
        if price_factor < 1.0 {
            multiplier *= price_factor;
            notes.push(format!("entry price {:.3} x{:.1}", price, price_factor));
        }

        if multiplier < self.floor {
            return veto(format!(
                "multiplier {:.3} below floor {:.2}",
                multiplier, self.floor
            ));
        }

        GateVerdict {
            multiplier,
            veto: None,
            notes,
        }
    }
}

fn opposes(direction: Direction, cvd: f64) -> bool {
    match direction {
        Direction::Long => cvd < 0.0,
        Direction::Short => cvd > 0.0,
    }
}

/// Counts 0.50-crossings per window, reset on rollover.
#[derive(Debug, Default)]
pub struct CrossTracker {
    window: Option<WindowId>,
    last_price: Option<f64>,
    count: u32,
}

impl CrossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, window: WindowId, price: f64) {
        if self.window != Some(window) {
            self.window = Some(window);
            self.last_price = None;
            self.count = 0;
        }
        if let Some(last) = self.last_price {
            if (last - 0.50).signum() != (price - 0.50).signum() && last != price {
                self.count += 1;
            }
        }
        self.last_price = Some(price);
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(direction: Direction, price: f64) -> RiskInput {
        RiskInput {
            direction,
            entry_price: price,
            cvd_5m: 0.0,
            cvd_1m: 0.0,
            seconds_remaining: Some(400),
            cross_count: 0,
        }
    }

    #[test]
    fn test_clean_entry_keeps_full_size() {
        let gate = RiskGate::default();
        let verdict = gate.evaluate(&input(Direction::Long, 0.62));
        assert!(verdict.approved());
        assert!((verdict.multiplier - 1.0).abs() < 1e-9);
        assert!(verdict.notes.is_empty());
    }

    #[test]
    fn test_insufficient_time_vetoes() {
        // 90s remaining against a 120s minimum means no order at all
        let gate = RiskGate::new(0.10, 120, 540);
        let mut i = input(Direction::Long, 0.62);
        i.seconds_remaining = Some(90);
        let verdict = gate.evaluate(&i);
        assert!(!verdict.approved());
        assert_eq!(verdict.multiplier, 0.0);
    }

    #[test]
    fn test_missing_end_time_vetoes() {
        let gate = RiskGate::default();
        let mut i = input(Direction::Long, 0.62);
        i.seconds_remaining = None;
        assert!(!gate.evaluate(&i).approved());
    }

    #[test]
    fn test_too_early_halves() {
        let gate = RiskGate::default();
        let mut i = input(Direction::Long, 0.62);
        i.seconds_remaining = Some(700);
        let verdict = gate.evaluate(&i);
        assert!(verdict.approved());
        assert!((verdict.multiplier - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_opposing_flow_shrinks() {
        let gate = RiskGate::default();
        let mut i = input(Direction::Long, 0.62);
        i.cvd_5m = -150_000.0;
        let verdict = gate.evaluate(&i);
        assert!(verdict.approved());
        assert!((verdict.multiplier - 0.3).abs() < 1e-9);

        i.cvd_1m = -60_000.0;
        let verdict = gate.evaluate(&i);
        // 0.3 * 0.6 = 0.18
        assert!((verdict.multiplier - 0.18).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_opposing_flow_vetoes() {
        let gate = RiskGate::default();
        let mut i = input(Direction::Short, 0.62);
        i.cvd_5m = 350_000.0;
        assert!(!gate.evaluate(&i).approved());
    }

    #[test]
    fn test_aligned_flow_is_ignored() {
        let gate = RiskGate::default();
        let mut i = input(Direction::Long, 0.62);
        i.cvd_5m = 350_000.0; // same direction, however large
        assert!(gate.evaluate(&i).approved());
    }

    #[test]
    fn test_coin_flip_zone() {
        let gate = RiskGate::default();
        let verdict = gate.evaluate(&input(Direction::Long, 0.52));
        assert!((verdict.multiplier - 0.5).abs() < 1e-9);

        let verdict = gate.evaluate(&input(Direction::Long, 0.58));
        assert!((verdict.multiplier - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_cross_count_bands() {
        let gate = RiskGate::default();

        let mut i = input(Direction::Long, 0.62);
        i.cross_count = 4;
        let verdict = gate.evaluate(&i);
        assert!(verdict.approved());
        assert!((verdict.multiplier - 0.5).abs() < 1e-9);

        i.cross_count = 6;
        assert!(!gate.evaluate(&i).approved());
    }

    #[test]
    fn test_churn_with_opposing_flow_vetoes() {
        // Either alone would only shrink; together they veto
        let gate = RiskGate::default();
        let mut i = input(Direction::Long, 0.62);
        i.cross_count = 4;
        i.cvd_5m = -150_000.0;
        assert!(!gate.evaluate(&i).approved());
    }

    #[test]
    fn test_price_bands() {
        let gate = RiskGate::default();
        for (price, expected) in [(0.90, 0.2), (0.80, 0.3), (0.70, 0.6)] {
            let verdict = gate.evaluate(&input(Direction::Long, price));
            assert!(
                (verdict.multiplier - expected).abs() < 1e-9,
                "price {} -> {}",
                price,
                verdict.multiplier
            );
        }
        // Mirrored cheap side: 0.10 is x0.2 but also far from 0.50
        let verdict = gate.evaluate(&input(Direction::Long, 0.12));
        assert!((verdict.multiplier - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_floor_becomes_veto() {
        let gate = RiskGate::default();
        // Opposing 5m flow (x0.3) on an ugly price (x0.2) = 0.06 < 0.10
        let mut i = input(Direction::Long, 0.90);
        i.cvd_5m = -150_000.0;
        let verdict = gate.evaluate(&i);
        assert!(!verdict.approved());
        assert_eq!(verdict.multiplier, 0.0);
    }

    #[test]
    fn test_cross_tracker_counts_and_resets() {
        let mut tracker = CrossTracker::new();
        let w1 = WindowId(100);

        for price in [0.48, 0.52, 0.47, 0.55] {
            tracker.observe(w1, price);
        }
        assert_eq!(tracker.count(), 3);

        // Same-side moves do not count
        tracker.observe(w1, 0.60);
        assert_eq!(tracker.count(), 3);

        // Rollover resets
        let w2 = WindowId(101);
        tracker.observe(w2, 0.45);
        assert_eq!(tracker.count(), 0);
    }
}
