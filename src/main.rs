use quorumbot::config::Settings;
use quorumbot::db::Store;
use quorumbot::exchange::{ClobClient, ExchangeApi};
use quorumbot::execution::{
    ActionGate, OrderExecutor, PositionLifecycleManager, ReconciliationSweeper,
};
use quorumbot::execution::executor::RetryPolicy;
use quorumbot::feed::oracle::OracleReader;
use quorumbot::feed::{PriceBook, PriceHistory};
use quorumbot::indicators::calculate_rsi;
use quorumbot::memory::{PriorBiasEstimator, SessionFeatures};
use quorumbot::models::{Direction, EntryMetrics, MarketSnapshot, WindowId};
use quorumbot::risk::{CrossTracker, ExposureLedger, RiskGate, RiskInput};
use quorumbot::voting::{DecisionAggregator, VoteContext, VoterPool};
use quorumbot::Result;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::{interval_at, Duration, Instant};

/// Action-gate key for the single in-flight entry attempt. Position ids
/// from the store start at 1, so 0 never collides.
const ENTRY_SLOT: i64 = 0;

/// How many closed sessions the prior scan reads back.
const SESSION_LOOKBACK: i64 = 500;

// ============================================================================
// Shared State
// ============================================================================

struct EngineState {
    settings: Arc<Settings>,
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<Store>,
    lifecycle: Arc<PositionLifecycleManager>,
    actions: ActionGate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 QuorumBot starting - Multi-Loop Architecture");

    let settings = Arc::new(Settings::load()?);
    let store = Arc::new(Store::new(&settings.database_url).await?);

    let exchange: Arc<dyn ExchangeApi> = Arc::new(ClobClient::new(&settings.clob_base_url));
    let executor = Arc::new(OrderExecutor::new(
        exchange.clone(),
        RetryPolicy {
            max_attempts: settings.max_order_attempts,
            initial_backoff: StdDuration::from_millis(settings.initial_backoff_ms),
            max_backoff: StdDuration::from_millis(settings.max_backoff_ms),
        },
    ));

    let ledger = ExposureLedger::new(
        settings.exposure_cap(),
        settings.cooldown_secs,
        settings.max_same_direction_per_window,
        settings.max_trades_per_window,
    );

    // Daily stats survive a restart: rebuilt from today's closed positions
    let daily = store.restore_daily_stats(Utc::now()).await?;
    tracing::info!(
        "📂 restored daily stats: {} trades, pnl {:+.2}",
        daily.trades,
        daily.realized_pnl
    );

    let lifecycle = Arc::new(PositionLifecycleManager::new(
        exchange.clone(),
        executor.clone(),
        store.clone(),
        ledger,
        settings.clone(),
        daily,
    ));

    // One gate for every loop that mutates positions, so the monitor and
    // the sweeper can never work the same position concurrently
    let actions = ActionGate::new(settings.max_concurrent_actions);

    let sweeper = Arc::new(ReconciliationSweeper::new(
        store.clone(),
        exchange.clone(),
        executor.clone(),
        lifecycle.clone(),
        actions.clone(),
        settings.stuck_closing_secs,
    ));

    // Reconcile the book of record against the exchange before trading
    sweeper.startup().await?;

    let state = Arc::new(EngineState {
        settings: settings.clone(),
        exchange,
        store,
        lifecycle,
        actions,
    });

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Bankroll: ${:.2}", settings.bankroll);
    tracing::info!("  Exposure cap/window: ${:.2}", settings.exposure_cap());
    tracing::info!("  Vote gate: {} votes @ {:.0}%", settings.min_votes, settings.min_confidence * 100.0);
    tracing::info!("  Max daily loss: {}%", settings.max_daily_loss_pct * 100.0);

    tracing::info!("\n🔄 Spawning independent loops...");

    // Loop 1: decide and enter
    let decision_task = {
        let state = state.clone();
        tokio::spawn(async move {
            decision_loop(state).await;
        })
    };

    // Loop 2: watch open positions and exit
    let monitor_task = {
        let state = state.clone();
        tokio::spawn(async move {
            monitor_loop(state).await;
        })
    };

    // Loop 3: reconcile stuck and orphaned positions
    let sweep_task = {
        let settings = settings.clone();
        tokio::spawn(async move {
            sweep_loop(sweeper, settings.sweep_interval_secs).await;
        })
    };

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("  🗳️  Decision: every {}s", settings.decision_interval_secs);
    tracing::info!("  👁️  Monitor: every {}s", settings.monitor_interval_secs);
    tracing::info!("  🧹 Sweeper: every {}s", settings.sweep_interval_secs);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = decision_task => {
            tracing::error!("Decision loop exited: {:?}", result);
        }
        result = monitor_task => {
            tracing::error!("Monitor loop exited: {:?}", result);
        }
        result = sweep_task => {
            tracing::error!("Sweep loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 QuorumBot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("quorumbot=info,quorumbot::voting=debug")
        .init();
}

// ============================================================================
// Loop 1: Decision
// ============================================================================

async fn decision_loop(state: Arc<EngineState>) {
    tracing::info!("🗳️  Decision Loop starting...");

    let settings = &state.settings;
    let mut book = PriceBook::new();
    let mut history = PriceHistory::new(240);
    let mut cross_tracker = CrossTracker::new();
    let pool = VoterPool::standard();
    let aggregator = DecisionAggregator::new(settings.min_votes, settings.min_confidence);
    let gate = RiskGate::new(
        settings.risk_floor,
        settings.min_seconds_remaining,
        settings.early_entry_secs,
    );
    let estimator = PriorBiasEstimator::default();
    let oracle = OracleReader::new(&settings.oracle_path, settings.oracle_ttl_secs);

    let mut ticker = interval_at(
        Instant::now(),
        Duration::from_secs(settings.decision_interval_secs),
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = decision_tick(
            &state,
            &mut book,
            &mut history,
            &mut cross_tracker,
            &pool,
            &aggregator,
            &gate,
            &estimator,
            &oracle,
        )
        .await
        {
            tracing::error!("decision tick failed: {}", e);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn decision_tick(
    state: &EngineState,
    book: &mut PriceBook,
    history: &mut PriceHistory,
    cross_tracker: &mut CrossTracker,
    pool: &VoterPool,
    aggregator: &DecisionAggregator,
    gate: &RiskGate,
    estimator: &PriorBiasEstimator,
    oracle: &OracleReader,
) -> Result<()> {
    let settings = &state.settings;
    let yes_token = &settings.yes_token_id;

    // Polled REST quote into the last-write-wins book
    match state.exchange.get_quote(yes_token).await {
        Ok(msg) => {
            book.apply(msg);
        }
        Err(e) => tracing::warn!("quote fetch failed: {}", e),
    }

    let now = Utc::now();
    let snap = match book.snapshot(yes_token, now, settings.tick_freshness_secs) {
        Some(s) => s,
        None => {
            tracing::debug!("no fresh quote, voiding tick");
            return Ok(());
        }
    };

    history.push(yes_token, snap.price);
    cross_tracker.observe(snap.window, snap.price);

    let prices = history.last_n(yes_token, 240);
    let oracle_signal = oracle.read();
    let rsi = calculate_rsi(&prices, 14);
    let (cvd_5m, cvd_1m) = oracle_signal
        .as_ref()
        .map(|o| (o.cvd_5m, o.cvd_1m))
        .unwrap_or((0.0, 0.0));

    let prior_bias = match state.store.closed_sessions(SESSION_LOOKBACK).await {
        Ok(records) => {
            let features = SessionFeatures::extract(snap.price, rsi, cvd_5m, &prices, now);
            estimator.bias_for_window(snap.window, &features, &records)
        }
        Err(e) => {
            tracing::warn!("session history unavailable: {}", e);
            0.0
        }
    };

    let ctx = VoteContext {
        price: snap.price,
        history: &prices,
        oracle: oracle_signal.as_ref(),
        prior_bias,
    };
    let votes = pool.collect(&ctx);

    let decision = match aggregator.aggregate(votes) {
        Some(d) => d,
        None => return Ok(()),
    };
    tracing::info!(
        "🗳️  decision: {} ({:.0}% confidence, {}/{} votes)",
        decision.direction.as_str(),
        decision.confidence * 100.0,
        decision.votes_for,
        decision.total_votes
    );

    let seconds_remaining = snap.window.seconds_remaining(now);
    let verdict = gate.evaluate(&RiskInput {
        direction: decision.direction,
        entry_price: snap.price,
        cvd_5m,
        cvd_1m,
        seconds_remaining: Some(seconds_remaining),
        cross_count: cross_tracker.count(),
    });
    if let Some(reason) = &verdict.veto {
        tracing::info!("⛔ entry vetoed: {}", reason);
        return Ok(());
    }
    for note in &verdict.notes {
        tracing::debug!("risk note: {}", note);
    }

    // One entry attempt in flight at a time
    let _permit = match state.actions.try_acquire(ENTRY_SLOT) {
        Some(p) => p,
        None => {
            tracing::debug!("entry already in flight, skipping tick");
            return Ok(());
        }
    };

    let metrics = EntryMetrics {
        rsi,
        cvd_5m,
        cvd_1m,
        minutes_to_expiry: seconds_remaining / 60,
    };

    // LONG buys the YES token at its ask; SHORT buys the NO token, whose
    // book is the mirror of the YES book.
    let entry_snap = match decision.direction {
        Direction::Long => snap.clone(),
        Direction::Short => mirror_snapshot(&snap, &settings.no_token_id),
    };

    if let Some(position) = state
        .lifecycle
        .try_open(&entry_snap, &decision, verdict.multiplier, metrics, now)
        .await?
    {
        tracing::info!(
            "🎯 entered position {} on window {}",
            position.id,
            position.window
        );
    }
    Ok(())
}

/// NO-token view of a YES-token quote: price and book are complements.
fn mirror_snapshot(snap: &MarketSnapshot, no_token_id: &str) -> MarketSnapshot {
    MarketSnapshot {
        token_id: no_token_id.to_string(),
        price: 1.0 - snap.price,
        best_bid: 1.0 - snap.best_ask,
        best_ask: 1.0 - snap.best_bid,
        server_time: snap.server_time,
        window: snap.window,
    }
}

// ============================================================================
// Loop 2: Monitor
// ============================================================================

async fn monitor_loop(state: Arc<EngineState>) {
    tracing::info!("👁️  Monitor Loop starting...");

    let mut ticker = interval_at(
        Instant::now(),
        Duration::from_secs(state.settings.monitor_interval_secs),
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = monitor_tick(&state).await {
            tracing::error!("monitor tick failed: {}", e);
        }
    }
}

async fn monitor_tick(state: &EngineState) -> Result<()> {
    let positions = state.store.open_positions().await?;
    if positions.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    for mut position in positions {
        // Skip anything the sweeper or a previous close is still touching
        let _permit = match state.actions.try_acquire(position.id) {
            Some(p) => p,
            None => continue,
        };

        let quote = match state.exchange.get_quote(&position.token_id).await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!("no quote for position {}: {}", position.id, e);
                continue;
            }
        };
        let snap = MarketSnapshot {
            token_id: position.token_id.clone(),
            price: quote.mid(),
            best_bid: quote.best_bid,
            best_ask: quote.best_ask,
            server_time: quote.server_time,
            window: WindowId::containing(quote.server_time),
        };

        if let Err(e) = state.lifecycle.monitor(&mut position, &snap, now).await {
            tracing::error!("monitor of position {} failed: {}", position.id, e);
        }
    }
    Ok(())
}

// ============================================================================
// Loop 3: Sweeper
// ============================================================================

async fn sweep_loop(sweeper: Arc<ReconciliationSweeper>, interval_secs: u64) {
    tracing::info!("🧹 Sweep Loop starting...");

    let mut ticker = interval_at(
        Instant::now() + Duration::from_secs(interval_secs),
        Duration::from_secs(interval_secs),
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        tracing::debug!("🧹 sweep tick at {}", Utc::now().format("%H:%M:%S"));
        if let Err(e) = sweeper.sweep(Utc::now()).await {
            tracing::error!("sweep failed: {}", e);
        }
    }
}
