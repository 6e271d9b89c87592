//! Historical-outcome prior.
//!
//! Before any signal fires, the engine already holds an opinion: a scan
//! of past closed positions whose market state resembled the current one
//! answers "which side won when things looked like this?". The result is
//! a directional bias in [-1, 1], computed at most once per window.

use std::sync::Mutex;

use chrono::{DateTime, Timelike, Utc};

use crate::indicators::{clamped_volatility, pct_change};
use crate::models::{Direction, WindowId};

/// One closed position reduced to what the similarity scan needs.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub side: Direction,
    pub entry_price: f64,
    pub pnl: f64,
    pub rsi: f64,
    /// Combined CVD, 0.7 x 5-minute + 0.3 x 1-minute.
    pub cvd: f64,
    pub minutes_to_expiry: i64,
}

impl SessionRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Normalized feature vector of one trading session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionFeatures {
    /// Price bucket 0..=4 over (0, 1).
    pub price_bin: f64,
    /// Quarter-hour slot within the hour, 0..=3.
    pub time_slot: f64,
    /// RSI / 100.
    pub rsi: f64,
    /// CVD / 150k, clamped to [-1, 1].
    pub cvd: f64,
    /// 5-point trend / 10%, clamped to [-1, 1].
    pub price_trend: f64,
    /// Relative stdev of the last 10 points, clamped to 0.3 then scaled to [0, 1].
    pub volatility: f64,
}

impl SessionFeatures {
    pub fn extract(
        price: f64,
        rsi: Option<f64>,
        cvd_5m: f64,
        history: &[f64],
        now: DateTime<Utc>,
    ) -> Self {
        let price_bin = if price < 0.20 {
            0.0
        } else if price < 0.40 {
            1.0
        } else if price < 0.60 {
            2.0
        } else if price < 0.80 {
            3.0
        } else {
            4.0
        };

        let time_slot = ((now.minute() / 15) % 4) as f64;

        let price_trend = if history.len() >= 5 {
            let recent = &history[history.len() - 5..];
            let trend = pct_change(recent).unwrap_or(0.0) / 100.0;
            (trend / 0.1).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let volatility = if history.len() >= 10 {
            clamped_volatility(&history[history.len() - 10..], 0.3) / 0.3
        } else {
            0.0
        };

        Self {
            price_bin,
            time_slot,
            rsi: rsi.unwrap_or(50.0) / 100.0,
            cvd: (cvd_5m / 150_000.0).clamp(-1.0, 1.0),
            price_trend,
            volatility,
        }
    }

    /// Approximate features of a historical record. Fields the store does
    /// not keep (time slot, trend, volatility) use neutral values whose
    /// weight keeps their influence small.
    fn from_record(record: &SessionRecord) -> Self {
        Self {
            price_bin: (record.entry_price * 5.0).floor().clamp(0.0, 4.0),
            time_slot: 0.0,
            rsi: record.rsi / 100.0,
            cvd: (record.cvd / 150_000.0).clamp(-1.0, 1.0),
            price_trend: 0.0,
            volatility: 0.5,
        }
    }

    /// Similarity in [0, 1] via weighted Euclidean distance.
    pub fn similarity(&self, other: &Self) -> f64 {
        const WEIGHTS: [f64; 6] = [2.0, 1.0, 0.5, 1.5, 1.0, 1.2];
        let diffs = [
            self.price_bin - other.price_bin,
            self.time_slot - other.time_slot,
            self.rsi - other.rsi,
            self.cvd - other.cvd,
            self.price_trend - other.price_trend,
            self.volatility - other.volatility,
        ];
        let distance: f64 = diffs
            .iter()
            .zip(WEIGHTS)
            .map(|(d, w)| w * d * d)
            .sum::<f64>()
            .sqrt();

        // Max plausible distance is about 3.0
        (1.0 - distance / 3.0).max(0.0)
    }
}

/// Recency weighting by how deep into the window the trade was entered.
/// The last six minutes of a window carry the most reliable readings.
fn time_weight(minutes_to_expiry: i64) -> f64 {
    if minutes_to_expiry <= 6 {
        2.0
    } else if minutes_to_expiry <= 9 {
        1.5
    } else {
        1.0
    }
}

/// Computes and caches the per-window directional prior.
pub struct PriorBiasEstimator {
    k: usize,
    min_sessions: usize,
    cache: Mutex<Option<(WindowId, f64)>>,
}

impl PriorBiasEstimator {
    const MIN_SIDE_WEIGHT: f64 = 5.0;

    pub fn new(k: usize, min_sessions: usize) -> Self {
        Self {
            k,
            min_sessions,
            cache: Mutex::new(None),
        }
    }

    /// Bias for the given window, computed once per window and reused
    /// until rollover.
    pub fn bias_for_window(
        &self,
        window: WindowId,
        features: &SessionFeatures,
        records: &[SessionRecord],
    ) -> f64 {
        let mut cache = self.cache.lock().unwrap();
        if let Some((cached_window, bias)) = *cache {
            if cached_window == window {
                return bias;
            }
        }

        let bias = self.compute(features, records);
        *cache = Some((window, bias));
        tracing::info!("🧠 prior bias for window {}: {:+.2}", window, bias);
        bias
    }

    /// Pure KNN bias over the records, 0.0 when history is too thin.
    pub fn compute(&self, features: &SessionFeatures, records: &[SessionRecord]) -> f64 {
        if records.len() < self.min_sessions {
            tracing::debug!(
                "prior bias: insufficient history ({} < {})",
                records.len(),
                self.min_sessions
            );
            return 0.0;
        }

        let mut scored: Vec<(f64, &SessionRecord)> = records
            .iter()
            .map(|r| (features.similarity(&SessionFeatures::from_record(r)), r))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.k);

        let mut long_wins = 0.0;
        let mut long_weight = 0.0;
        let mut short_wins = 0.0;
        let mut short_weight = 0.0;

        for (_, record) in &scored {
            let weight = time_weight(record.minutes_to_expiry);
            match record.side {
                Direction::Long => {
                    long_weight += weight;
                    if record.is_win() {
                        long_wins += weight;
                    }
                }
                Direction::Short => {
                    short_weight += weight;
                    if record.is_win() {
                        short_wins += weight;
                    }
                }
            }
        }

        if long_weight >= Self::MIN_SIDE_WEIGHT && short_weight >= Self::MIN_SIDE_WEIGHT {
            let long_win_rate = long_wins / long_weight;
            let short_win_rate = short_wins / short_weight;
            ((long_win_rate - short_win_rate) * 2.0).clamp(-1.0, 1.0)
        } else {
            // One side is underrepresented; fall back to a damped overall rate
            let total_weight = long_weight + short_weight;
            let total_win_rate = if total_weight > 0.0 {
                (long_wins + short_wins) / total_weight
            } else {
                0.5
            };
            (total_win_rate - 0.5) * 0.5
        }
    }
}

impl Default for PriorBiasEstimator {
    fn default() -> Self {
        Self::new(30, 30)
    }
}
