use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Length of one trading window in seconds (15-minute binary markets).
pub const WINDOW_SECS: i64 = 900;

/// Direction of a position or vote.
///
/// `Long` buys the YES token, `Short` buys the NO token. Closing either
/// side is always a SELL of the held token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

/// Identifier of one fixed-duration trading window.
///
/// Derived from the window's start timestamp so that two snapshots taken
/// in the same window always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub i64);

impl WindowId {
    /// Window containing the given instant.
    pub fn containing(ts: DateTime<Utc>) -> Self {
        Self(ts.timestamp() / WINDOW_SECS)
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0 * WINDOW_SECS, 0).unwrap()
    }

    pub fn end(&self) -> DateTime<Utc> {
        Utc.timestamp_opt((self.0 + 1) * WINDOW_SECS, 0).unwrap()
    }

    /// Seconds until this window settles, negative once expired.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        self.end().timestamp() - now.timestamp()
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.start().format("%Y%m%d-%H%M"))
    }
}

/// One observation of the market. Ephemeral - never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub token_id: String,
    /// Mid/last price of the YES token, in (0, 1).
    pub price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub server_time: DateTime<Utc>,
    pub window: WindowId,
}

/// A single voter's opinion for one evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub source: String,
    pub direction: Direction,
    pub confidence: f64,
    pub weight: f64,
    pub reason: String,
}

/// Aggregated voting outcome after the gate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub direction: Direction,
    pub confidence: f64,
    pub votes_for: usize,
    pub votes_against: usize,
    pub total_votes: usize,
    pub long_confidence: f64,
    pub short_confidence: f64,
    /// Every vote that went into the aggregate, kept for the audit trail.
    pub votes: Vec<Vote>,
}

/// Side-channel oracle snapshot (refreshed out of process, read with a TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSignal {
    #[serde(default)]
    pub signal_score: f64,
    #[serde(default)]
    pub cvd_5m: f64,
    #[serde(default)]
    pub cvd_1m: f64,
    #[serde(default)]
    pub momentum_30s: f64,
    #[serde(default)]
    pub momentum_60s: f64,
    #[serde(default)]
    pub momentum_120s: f64,
    /// "LONG" / "SHORT" / "NEUTRAL" trend from the external trend tracker.
    #[serde(default)]
    pub trend: String,
    #[serde(default = "default_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

impl Default for OracleSignal {
    fn default() -> Self {
        Self {
            signal_score: 0.0,
            cvd_5m: 0.0,
            cvd_1m: 0.0,
            momentum_30s: 0.0,
            momentum_60s: 0.0,
            momentum_120s: 0.0,
            trend: String::new(),
            timestamp: default_timestamp(),
        }
    }
}

impl OracleSignal {
    pub fn trend_direction(&self) -> Option<Direction> {
        match self.trend.as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

/// Lifecycle state of a position.
///
/// Legal transitions: Pending -> Open | Failed, Open -> Closing,
/// Closing -> Closed | Open (failed close retries). Closed and Failed
/// are terminal; rows are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Pending,
    Open,
    Closing,
    Closed,
    Failed,
}

impl PositionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Failed)
    }

    /// Whether a transition from `self` to `next` is on the allowed graph.
    pub fn can_transition_to(self, next: PositionState) -> bool {
        use PositionState::*;
        matches!(
            (self, next),
            (Pending, Open)
                | (Pending, Failed)
                | (Open, Closing)
                | (Closing, Closed)
                | (Closing, Open)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionState::Pending => "pending",
            PositionState::Open => "open",
            PositionState::Closing => "closing",
            PositionState::Closed => "closed",
            PositionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PositionState::Pending),
            "open" => Some(PositionState::Open),
            "closing" => Some(PositionState::Closing),
            "closed" => Some(PositionState::Closed),
            "failed" => Some(PositionState::Failed),
            _ => None,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Ceiling,
    WindowExpiry,
    /// The instrument settled to zero at window end.
    Settled,
    /// Closed outside this process (manual intervention or a standing
    /// order that filled while we were not looking).
    External,
    Manual,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::Ceiling => "CEILING",
            ExitReason::WindowExpiry => "WINDOW_EXPIRY",
            ExitReason::Settled => "SETTLED",
            ExitReason::External => "EXTERNAL",
            ExitReason::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TAKE_PROFIT" => Some(ExitReason::TakeProfit),
            "STOP_LOSS" => Some(ExitReason::StopLoss),
            "TRAILING_STOP" => Some(ExitReason::TrailingStop),
            "CEILING" => Some(ExitReason::Ceiling),
            "WINDOW_EXPIRY" => Some(ExitReason::WindowExpiry),
            "SETTLED" => Some(ExitReason::Settled),
            "EXTERNAL" => Some(ExitReason::External),
            "MANUAL" => Some(ExitReason::Manual),
            _ => None,
        }
    }
}

/// Market readings captured at entry time. Persisted with the position
/// so closed rows can be matched against future market states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryMetrics {
    pub rsi: Option<f64>,
    pub cvd_5m: f64,
    pub cvd_1m: f64,
    pub minutes_to_expiry: i64,
}

/// The durable trading record. Created PENDING when the exchange accepts
/// the entry order, flipped OPEN only once a fill is confirmed (with the
/// actual fill price), and retained forever once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Auto-increment store id; 0 until first persisted.
    pub id: i64,
    pub window: WindowId,
    pub token_id: String,
    pub side: Direction,
    pub entry_price: f64,
    pub size: f64,
    /// Notional committed at entry (size * entry_price).
    pub value: f64,
    pub state: PositionState,
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Running high-water mark since entry, drives the trailing stop.
    pub peak_price: f64,
    pub entry_order_id: Option<String>,
    /// Standing take-profit sell resting on the book while OPEN.
    pub tp_order_id: Option<String>,
    pub close_order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub risk_multiplier: f64,
    pub metrics: EntryMetrics,
    /// Serialized `Decision` that opened this position, for audit.
    pub vote_snapshot: String,
    pub pnl: Option<f64>,
}

impl Position {
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_alignment() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 14, 7, 30).unwrap();
        let w = WindowId::containing(ts);
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap());
        assert_eq!(w.end(), Utc.with_ymd_and_hms(2026, 3, 1, 14, 15, 0).unwrap());

        // Two instants inside the same window map to the same id
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 14, 14, 59).unwrap();
        assert_eq!(w, WindowId::containing(later));

        // The next second starts a new window
        let next = Utc.with_ymd_and_hms(2026, 3, 1, 14, 15, 0).unwrap();
        assert_ne!(w, WindowId::containing(next));
    }

    #[test]
    fn test_window_seconds_remaining() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 14, 12, 0).unwrap();
        let w = WindowId::containing(ts);
        assert_eq!(w.seconds_remaining(ts), 180);

        let past_end = Utc.with_ymd_and_hms(2026, 3, 1, 14, 16, 0).unwrap();
        assert_eq!(w.seconds_remaining(past_end), -60);
    }

    #[test]
    fn test_state_transition_graph() {
        use PositionState::*;

        assert!(Pending.can_transition_to(Open));
        assert!(Pending.can_transition_to(Failed));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Open));

        // No shortcuts
        assert!(!Pending.can_transition_to(Closed));
        assert!(!Pending.can_transition_to(Closing));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Failed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            PositionState::Pending,
            PositionState::Open,
            PositionState::Closing,
            PositionState::Closed,
            PositionState::Failed,
        ] {
            assert_eq!(PositionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PositionState::parse("bogus"), None);
    }

    #[test]
    fn test_exit_reason_roundtrip() {
        for reason in [
            ExitReason::TakeProfit,
            ExitReason::StopLoss,
            ExitReason::TrailingStop,
            ExitReason::Ceiling,
            ExitReason::WindowExpiry,
            ExitReason::Settled,
            ExitReason::External,
            ExitReason::Manual,
        ] {
            assert_eq!(ExitReason::parse(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
    }
}
