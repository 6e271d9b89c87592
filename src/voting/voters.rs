//! The concrete voting rules.
//!
//! Each rule looks at one narrow slice of the context and either votes
//! with a confidence in [0, 1] or abstains. Thresholds and weights are
//! the values the live system was tuned on.

use super::{VoteContext, Voter};
use crate::indicators::{calculate_rsi, calculate_vwap, pct_change, vwap_deviation_pct};
use crate::models::{Direction, Vote};

const MAX_CONFIDENCE: f64 = 0.99;

fn vote(source: &str, direction: Direction, confidence: f64, weight: f64, reason: String) -> Vote {
    Vote {
        source: source.to_string(),
        direction,
        confidence: confidence.min(MAX_CONFIDENCE),
        weight,
        reason,
    }
}

/// Exchange-side momentum over a precise 30/60/120 second lookback,
/// delivered through the oracle file.
pub struct UltraShortMomentumVoter {
    period_seconds: u32,
    weight: f64,
    name: String,
}

impl UltraShortMomentumVoter {
    const THRESHOLD_PCT: f64 = 0.2;

    pub fn new(period_seconds: u32, weight: f64) -> Self {
        Self {
            period_seconds,
            weight,
            name: format!("Momentum {}s", period_seconds),
        }
    }
}

impl Voter for UltraShortMomentumVoter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        let oracle = ctx.oracle?;
        let momentum_pct = match self.period_seconds {
            30 => oracle.momentum_30s,
            60 => oracle.momentum_60s,
            120 => oracle.momentum_120s,
            _ => return None,
        };

        if momentum_pct.abs() < Self::THRESHOLD_PCT {
            return None;
        }

        let direction = if momentum_pct > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Some(vote(
            &self.name,
            direction,
            momentum_pct.abs() / 3.0,
            self.weight,
            format!("{}s momentum {:+.2}%", self.period_seconds, momentum_pct),
        ))
    }
}

/// Momentum over the last 10 price points of the instrument itself.
pub struct PriceMomentumVoter {
    weight: f64,
}

impl PriceMomentumVoter {
    const LOOKBACK: usize = 10;
    const THRESHOLD_PCT: f64 = 1.0;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for PriceMomentumVoter {
    fn name(&self) -> &str {
        "Price Momentum"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        if ctx.history.len() < Self::LOOKBACK {
            return None;
        }
        let recent = &ctx.history[ctx.history.len() - Self::LOOKBACK..];
        let momentum_pct = pct_change(recent)?;

        if momentum_pct.abs() <= Self::THRESHOLD_PCT {
            return None;
        }

        let direction = if momentum_pct > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Some(vote(
            self.name(),
            direction,
            momentum_pct.abs() / 5.0,
            self.weight,
            format!("10-point move {:+.2}%", momentum_pct),
        ))
    }
}

/// Contrarian RSI rule: stretched readings fade the move.
pub struct RsiVoter {
    weight: f64,
}

impl RsiVoter {
    const PERIOD: usize = 14;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for RsiVoter {
    fn name(&self) -> &str {
        "RSI"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        let rsi = calculate_rsi(ctx.history, Self::PERIOD)?;

        // 60 -> 0%, 100 -> 100% (and mirrored below 40)
        let (direction, confidence) = if rsi > 60.0 {
            (Direction::Short, (rsi - 60.0) / 40.0)
        } else if rsi < 40.0 {
            (Direction::Long, (40.0 - rsi) / 40.0)
        } else {
            return None;
        };

        Some(vote(
            self.name(),
            direction,
            confidence,
            self.weight,
            format!("RSI {:.1}", rsi),
        ))
    }
}

/// Deviation from VWAP, trend-following.
pub struct VwapVoter {
    weight: f64,
}

impl VwapVoter {
    const THRESHOLD_PCT: f64 = 0.5;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for VwapVoter {
    fn name(&self) -> &str {
        "VWAP"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        let vwap = calculate_vwap(ctx.history, &[])?;
        let dist_pct = vwap_deviation_pct(ctx.price, vwap)?;

        let direction = if dist_pct > Self::THRESHOLD_PCT {
            Direction::Long
        } else if dist_pct < -Self::THRESHOLD_PCT {
            Direction::Short
        } else {
            return None;
        };

        Some(vote(
            self.name(),
            direction,
            dist_pct.abs() / 2.0,
            self.weight,
            format!("{:+.2}% vs VWAP", dist_pct),
        ))
    }
}

/// Short trend over the last 3 price points.
pub struct TrendStrengthVoter {
    weight: f64,
}

impl TrendStrengthVoter {
    const LOOKBACK: usize = 3;
    const THRESHOLD_PCT: f64 = 0.5;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for TrendStrengthVoter {
    fn name(&self) -> &str {
        "Trend Strength"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        if ctx.history.len() < Self::LOOKBACK {
            return None;
        }
        let recent = &ctx.history[ctx.history.len() - Self::LOOKBACK..];
        let trend_pct = pct_change(recent)?;

        if trend_pct.abs() <= Self::THRESHOLD_PCT {
            return None;
        }

        let direction = if trend_pct > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Some(vote(
            self.name(),
            direction,
            trend_pct.abs() / 3.0,
            self.weight,
            format!("3-point trend {:+.2}%", trend_pct),
        ))
    }
}

/// Cumulative volume delta from the oracle, on the 5-minute or 1-minute
/// window. The 5-minute reading carries the heaviest weight in the pool.
pub struct OrderFlowVoter {
    window: FlowWindow,
    weight: f64,
    name: String,
}

#[derive(Debug, Clone, Copy)]
enum FlowWindow {
    FiveMinute,
    OneMinute,
}

impl OrderFlowVoter {
    pub fn five_minute(weight: f64) -> Self {
        Self {
            window: FlowWindow::FiveMinute,
            weight,
            name: "Order Flow 5m".to_string(),
        }
    }

    pub fn one_minute(weight: f64) -> Self {
        Self {
            window: FlowWindow::OneMinute,
            weight,
            name: "Order Flow 1m".to_string(),
        }
    }
}

impl Voter for OrderFlowVoter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        let oracle = ctx.oracle?;
        let (cvd, threshold, max_score, label) = match self.window {
            FlowWindow::FiveMinute => (oracle.cvd_5m, 50_000.0, 150_000.0, "5m"),
            FlowWindow::OneMinute => (oracle.cvd_1m, 20_000.0, 50_000.0, "1m"),
        };

        if cvd.abs() < threshold {
            return None;
        }

        let direction = if cvd > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Some(vote(
            &self.name,
            direction,
            cvd.abs() / max_score,
            self.weight,
            format!("{} CVD {:+.0}", label, cvd),
        ))
    }
}

/// Follows the oracle's slow trend tracker with a fixed confidence.
pub struct OracleTrendVoter {
    weight: f64,
}

impl OracleTrendVoter {
    const CONFIDENCE: f64 = 0.70;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for OracleTrendVoter {
    fn name(&self) -> &str {
        "Oracle Trend"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        let direction = ctx.oracle?.trend_direction()?;
        Some(vote(
            self.name(),
            direction,
            Self::CONFIDENCE,
            self.weight,
            format!("trend {}", direction.as_str()),
        ))
    }
}

/// Votes with the historical-outcome bias when it is strong enough.
pub struct PriorBiasVoter {
    weight: f64,
}

impl PriorBiasVoter {
    const MIN_BIAS: f64 = 0.3;

    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Voter for PriorBiasVoter {
    fn name(&self) -> &str {
        "Prior Bias"
    }

    fn evaluate(&self, ctx: &VoteContext) -> Option<Vote> {
        if ctx.prior_bias.abs() < Self::MIN_BIAS {
            return None;
        }
        let direction = if ctx.prior_bias > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Some(vote(
            self.name(),
            direction,
            ctx.prior_bias.abs(),
            self.weight,
            format!("historical bias {:+.2}", ctx.prior_bias),
        ))
    }
}
