use serde::Deserialize;

use crate::Result;

/// Immutable runtime settings, built once at startup and passed by
/// reference. Values come from defaults, overridden by `QUORUMBOT_*`
/// environment variables (dotenv loaded by main).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Endpoints
    pub clob_base_url: String,
    pub oracle_path: String,
    pub database_url: String,

    // Outcome tokens of the traded market
    pub yes_token_id: String,
    pub no_token_id: String,

    // Bankroll and sizing
    pub bankroll: f64,
    pub position_size_pct: f64,
    pub max_position_pct: f64,
    pub exposure_cap_pct: f64,
    pub min_order_size: f64,

    // Voting gate
    pub min_votes: usize,
    pub min_confidence: f64,

    // Entry constraints
    pub entry_price_min: f64,
    pub entry_price_max: f64,
    pub cooldown_secs: i64,
    pub max_same_direction_per_window: u32,
    pub max_trades_per_window: u32,

    // Exits
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_activation_pct: f64,
    pub trailing_trail_pct: f64,
    pub price_ceiling: f64,

    // Risk gate
    pub risk_floor: f64,
    pub min_seconds_remaining: i64,
    pub early_entry_secs: i64,

    // Circuit breakers
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,

    // Cadence
    pub decision_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub sweep_interval_secs: u64,

    // Freshness
    pub tick_freshness_secs: i64,
    pub oracle_ttl_secs: i64,

    // Executor
    pub max_order_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub fill_confirm_secs: u64,

    // Concurrency
    pub max_concurrent_actions: usize,

    // Sweeper
    pub stuck_closing_secs: i64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .set_default("clob_base_url", "https://clob.example.com")?
            .set_default("oracle_path", "oracle_signal.json")?
            .set_default("database_url", "sqlite://quorumbot.db")?
            .set_default("yes_token_id", "YES")?
            .set_default("no_token_id", "NO")?
            .set_default("bankroll", 1000.0)?
            .set_default("position_size_pct", 0.02)?
            .set_default("max_position_pct", 0.06)?
            .set_default("exposure_cap_pct", 0.10)?
            .set_default("min_order_size", 1.0)?
            .set_default("min_votes", 3)?
            .set_default("min_confidence", 0.6)?
            .set_default("entry_price_min", 0.15)?
            .set_default("entry_price_max", 0.85)?
            .set_default("cooldown_secs", 60)?
            .set_default("max_same_direction_per_window", 2)?
            .set_default("max_trades_per_window", 4)?
            .set_default("take_profit_pct", 0.25)?
            .set_default("stop_loss_pct", 0.30)?
            .set_default("trailing_activation_pct", 0.12)?
            .set_default("trailing_trail_pct", 0.05)?
            .set_default("price_ceiling", 0.95)?
            .set_default("risk_floor", 0.10)?
            .set_default("min_seconds_remaining", 180)?
            .set_default("early_entry_secs", 540)?
            .set_default("max_daily_loss_pct", 0.10)?
            .set_default("max_consecutive_losses", 4)?
            .set_default("decision_interval_secs", 15)?
            .set_default("monitor_interval_secs", 5)?
            .set_default("sweep_interval_secs", 120)?
            .set_default("tick_freshness_secs", 10)?
            .set_default("oracle_ttl_secs", 10)?
            .set_default("max_order_attempts", 6)?
            .set_default("initial_backoff_ms", 250)?
            .set_default("max_backoff_ms", 5000)?
            .set_default("fill_confirm_secs", 20)?
            .set_default("max_concurrent_actions", 4)?
            .set_default("stuck_closing_secs", 90)?
            .add_source(config::Environment::with_prefix("QUORUMBOT"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Absolute per-window exposure cap in notional terms.
    pub fn exposure_cap(&self) -> f64 {
        self.bankroll * self.exposure_cap_pct
    }

    /// Base notional per entry before signal and risk scaling.
    pub fn base_position_value(&self) -> f64 {
        self.bankroll * self.position_size_pct
    }

    /// Ceiling for a single entry, however strong the signal.
    pub fn max_position_value(&self) -> f64 {
        self.bankroll * self.max_position_pct
    }
}
