use thiserror::Error;

/// Errors surfaced by the exchange client and the order executor.
///
/// The variant decides the retry policy: `Transient` is retried with
/// backoff, `Ambiguous` forces an authoritative re-query, the rest are
/// terminal.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// The request may or may not have been accepted (timeout after send).
    /// Callers must re-query the order instead of assuming failure.
    #[error("ambiguous exchange outcome: {0}")]
    Ambiguous(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("invalid order parameter: {0}")]
    InvalidParameter(String),
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ExchangeError::Ambiguous(_))
    }
}

/// Reasons the risk layer refuses a new trade.
#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("window exposure cap exceeded: committed {committed:.2} + requested {requested:.2} > cap {cap:.2}")]
    ExposureExceeded {
        committed: f64,
        requested: f64,
        cap: f64,
    },

    #[error("opposite-side position already active in this window")]
    OppositeSideConflict,

    #[error("per-window trade limit reached ({0})")]
    WindowTradeLimit(u32),

    #[error("cooldown active, {0}s since last entry")]
    Cooldown(i64),

    #[error("entry price {0:.3} outside tradable band")]
    PriceOutOfBand(f64),
}
