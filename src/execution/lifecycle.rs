//! Position lifecycle.
//!
//! Owns the PENDING -> OPEN -> CLOSING -> CLOSED / FAILED machine. A
//! position becomes OPEN only from a confirmed fill with the actual
//! average fill price; exchange acceptance alone is just PENDING. Exits
//! are evaluated every monitor cycle, and the one genuinely ambiguous
//! outcome on this market (zero balance with an unfilled close) is
//! resolved by evidence, never by assumption.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::Store;
use crate::error::{ExchangeError, RiskError};
use crate::exchange::{ExchangeApi, OrderInfo, OrderRequest, OrderSide, OrderStatus};
use crate::execution::OrderExecutor;
use crate::models::{
    Decision, EntryMetrics, ExitReason, MarketSnapshot, Position, PositionState,
};
use crate::risk::{CircuitBreakers, DailyStats, ExposureLedger, Reservation};
use crate::Result;

/// Token balances below this are settlement dust, not a position.
const DUST_BALANCE: f64 = 0.01;

const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of the settlement probe for a close that could not fill.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementVerdict {
    /// The standing take-profit order filled while we were not looking.
    TakeProfitFilled { price: f64 },
    /// The window resolved against us; the token is worth nothing.
    SettledToZero,
    /// Not enough evidence either way; stay CLOSING and retry.
    Ambiguous,
}

pub struct PositionLifecycleManager {
    exchange: Arc<dyn ExchangeApi>,
    executor: Arc<OrderExecutor>,
    store: Arc<Store>,
    ledger: ExposureLedger,
    settings: Arc<Settings>,
    breakers: CircuitBreakers,
    daily: Mutex<DailyStats>,
    reservations: Mutex<HashMap<i64, Reservation>>,
}

impl PositionLifecycleManager {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        executor: Arc<OrderExecutor>,
        store: Arc<Store>,
        ledger: ExposureLedger,
        settings: Arc<Settings>,
        daily: DailyStats,
    ) -> Self {
        let breakers = CircuitBreakers {
            max_daily_loss_pct: settings.max_daily_loss_pct,
            max_consecutive_losses: settings.max_consecutive_losses,
        };
        Self {
            exchange,
            executor,
            store,
            ledger,
            settings,
            breakers,
            daily: Mutex::new(daily),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn daily_stats(&self) -> DailyStats {
        self.daily.lock().unwrap().clone()
    }

    /// Re-reserve exposure for positions loaded from the store at
    /// startup, so the cap still sees them.
    pub fn restore_reservations(&self, positions: &[Position]) {
        let mut reservations = self.reservations.lock().unwrap();
        for p in positions {
            if matches!(
                p.state,
                PositionState::Pending | PositionState::Open | PositionState::Closing
            ) {
                let r = self.ledger.restore(p.window, p.side, p.value);
                reservations.insert(p.id, r);
            }
        }
    }

    /// Attempt to open a position on the token `snap` quotes (already
    /// resolved to the side's outcome token). Returns None when any
    /// pre-trade check refuses the entry; that is business as usual.
    pub async fn try_open(
        &self,
        snap: &MarketSnapshot,
        decision: &Decision,
        risk_multiplier: f64,
        metrics: EntryMetrics,
        now: DateTime<Utc>,
    ) -> Result<Option<Position>> {
        {
            let mut daily = self.daily.lock().unwrap();
            daily.maybe_rollover(now);
            if let Err(trip) = self.breakers.check(&daily, self.settings.bankroll) {
                tracing::warn!("🛑 circuit breaker tripped: {:?}, no new entries", trip);
                return Ok(None);
            }
        }

        let entry_price = snap.best_ask;
        if entry_price < self.settings.entry_price_min || entry_price > self.settings.entry_price_max
        {
            tracing::info!("entry refused: {}", RiskError::PriceOutOfBand(entry_price));
            return Ok(None);
        }

        let value = self.entry_value(decision, risk_multiplier);
        if value < self.settings.min_order_size {
            tracing::info!("sized-down value {:.2} below minimum order, skipping", value);
            return Ok(None);
        }
        let size = value / entry_price;

        let reservation = match self.ledger.reserve(snap.window, decision.direction, value, now) {
            Ok(r) => r,
            Err(e) => {
                tracing::info!("entry refused by exposure ledger: {}", e);
                return Ok(None);
            }
        };

        let request = OrderRequest {
            intent_key: Uuid::new_v4().to_string(),
            token_id: snap.token_id.clone(),
            side: OrderSide::Buy,
            price: entry_price,
            size,
        };

        let entry_order_id = match self.executor.place(&request).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("entry order failed: {}", e);
                reservation.release();
                return Ok(None);
            }
        };

        let mut position = Position {
            id: 0,
            window: snap.window,
            token_id: snap.token_id.clone(),
            side: decision.direction,
            entry_price,
            size,
            value,
            state: PositionState::Pending,
            take_profit: 0.0,
            stop_loss: 0.0,
            peak_price: entry_price,
            entry_order_id: Some(entry_order_id.clone()),
            tp_order_id: None,
            close_order_id: None,
            exit_price: None,
            exit_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            risk_multiplier,
            metrics,
            vote_snapshot: serde_json::to_string(decision)?,
            pnl: None,
        };
        self.store.insert_position(&mut position).await?;
        self.reservations
            .lock()
            .unwrap()
            .insert(position.id, reservation);

        match self.await_fill(&entry_order_id).await {
            Some(info) if info.filled_size > 0.0 => {
                if info.status == OrderStatus::PartiallyFilled {
                    // Leave no remainder resting on the book
                    let _ = self.executor.cancel(&entry_order_id).await;
                }
                self.open_from_fill(&mut position, &info).await?;
                Ok(Some(position))
            }
            _ => {
                let _ = self.executor.cancel(&entry_order_id).await;
                // The cancel may have raced a fill; believe the book
                match self.exchange.get_order(&entry_order_id).await {
                    Ok(info) if info.filled_size > 0.0 => {
                        self.open_from_fill(&mut position, &info).await?;
                        Ok(Some(position))
                    }
                    _ => {
                        tracing::warn!("entry never filled, failing position {}", position.id);
                        self.store
                            .transition(&mut position, PositionState::Failed, Utc::now())
                            .await?;
                        self.release_reservation(position.id);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Notional for an entry. The winning side's weighted vote strength
    /// picks a size band (a unanimous pool with heavy order flow triples
    /// the base), confidence nudges it a little either way, and the band
    /// result is clamped between the base and the per-entry ceiling
    /// before the risk multiplier scales the whole thing down.
    pub(crate) fn entry_value(&self, decision: &Decision, risk_multiplier: f64) -> f64 {
        const STRONG_STRENGTH: f64 = 7.0;
        const FIRM_STRENGTH: f64 = 5.0;

        let strength: f64 = decision
            .votes
            .iter()
            .filter(|v| v.direction == decision.direction)
            .map(|v| v.weight * v.confidence)
            .sum();
        let band = if strength >= STRONG_STRENGTH {
            3.0
        } else if strength >= FIRM_STRENGTH {
            2.0
        } else {
            1.0
        };
        let confidence_adj = 0.9 + decision.confidence * 0.2;

        let sized = (self.settings.base_position_value() * band * confidence_adj).clamp(
            self.settings.base_position_value(),
            self.settings.max_position_value(),
        );
        sized * risk_multiplier
    }

    /// Flip PENDING to OPEN from a confirmed fill, recomputing the
    /// position from what actually happened rather than what was asked.
    pub(crate) async fn open_from_fill(
        &self,
        position: &mut Position,
        info: &OrderInfo,
    ) -> Result<()> {
        let fill_price = info.avg_fill_price.unwrap_or(position.entry_price);
        position.entry_price = fill_price;
        position.size = info.filled_size;
        position.value = fill_price * info.filled_size;
        position.peak_price = fill_price;
        position.take_profit = (fill_price * (1.0 + self.settings.take_profit_pct)).min(0.99);
        position.stop_loss = fill_price * (1.0 - self.settings.stop_loss_pct);

        self.store
            .transition(position, PositionState::Open, Utc::now())
            .await?;

        tracing::info!(
            "✅ position {} OPEN: {} {:.2} @ {:.3} (tp {:.3}, sl {:.3})",
            position.id,
            position.side.as_str(),
            position.size,
            position.entry_price,
            position.take_profit,
            position.stop_loss
        );

        // Standing take-profit sell, best effort
        let tp_request = OrderRequest {
            intent_key: Uuid::new_v4().to_string(),
            token_id: position.token_id.clone(),
            side: OrderSide::Sell,
            price: position.take_profit,
            size: position.size,
        };
        match self.executor.place(&tp_request).await {
            Ok(tp_order_id) => {
                position.tp_order_id = Some(tp_order_id);
                self.store.update_position(position).await?;
            }
            Err(e) => tracing::warn!("standing take-profit not placed: {}", e),
        }

        Ok(())
    }

    /// Which exit, if any, fires for an OPEN position at this price.
    pub fn evaluate_exit(
        &self,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        if price >= position.take_profit {
            return Some(ExitReason::TakeProfit);
        }
        if price >= self.settings.price_ceiling {
            return Some(ExitReason::Ceiling);
        }

        let activation = position.entry_price * (1.0 + self.settings.trailing_activation_pct);
        if position.peak_price >= activation
            && price <= position.peak_price * (1.0 - self.settings.trailing_trail_pct)
        {
            return Some(ExitReason::TrailingStop);
        }

        if price <= position.stop_loss {
            return Some(ExitReason::StopLoss);
        }
        if position.window.seconds_remaining(now) <= 0 {
            return Some(ExitReason::WindowExpiry);
        }
        None
    }

    /// One monitor pass for an OPEN position: track the peak, then close
    /// if a trigger fires.
    pub async fn monitor(
        &self,
        position: &mut Position,
        quote: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if quote.price > position.peak_price {
            position.peak_price = quote.price;
            position.updated_at = now;
            self.store.update_position(position).await?;
        }

        if let Some(reason) = self.evaluate_exit(position, quote.price, now) {
            let sell_price = self.close_price(quote, reason);
            self.close(position, sell_price, reason, now).await?;
        }
        Ok(())
    }

    /// Limit price for a close. A spike in the spread must not turn a
    /// routine exit into a fire sale, so the sell is floored at 95% of
    /// fair price; a stop-loss takes the bid as-is.
    pub fn close_price(&self, quote: &MarketSnapshot, reason: ExitReason) -> f64 {
        if reason == ExitReason::StopLoss {
            quote.best_bid
        } else {
            quote.best_bid.max(quote.price * 0.95)
        }
    }

    /// Close an OPEN position: persist CLOSING first, then sell.
    pub async fn close(
        &self,
        position: &mut Position,
        sell_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        tracing::info!(
            "📤 closing position {} ({}): {:?} @ {:.3}",
            position.id,
            position.side.as_str(),
            reason,
            sell_price
        );
        self.store
            .transition(position, PositionState::Closing, now)
            .await?;

        // Clear the standing take-profit before selling the same shares.
        // A cancel that reports "already done" means it probably filled.
        if let Some(tp_order_id) = position.tp_order_id.clone() {
            match self.executor.cancel(&tp_order_id).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Ok(info) = self.exchange.get_order(&tp_order_id).await {
                        if info.status == OrderStatus::Filled {
                            let price = info.avg_fill_price.unwrap_or(position.take_profit);
                            return self
                                .finalize_close(position, price, ExitReason::TakeProfit)
                                .await;
                        }
                    }
                }
                Err(e) => tracing::warn!("take-profit cancel failed: {}", e),
            }
        }

        let request = OrderRequest {
            intent_key: Uuid::new_v4().to_string(),
            token_id: position.token_id.clone(),
            side: OrderSide::Sell,
            price: sell_price,
            size: position.size,
        };

        let close_order_id = match self.executor.place(&request).await {
            Ok(id) => id,
            Err(ExchangeError::InsufficientBalance(_)) => {
                // No shares to sell: either the TP filled or the market
                // settled. Decide on evidence.
                return self.resolve_settlement(position).await;
            }
            Err(e) => {
                tracing::warn!(
                    "close order failed ({}), position {} stays CLOSING for the sweeper",
                    e,
                    position.id
                );
                return Ok(());
            }
        };

        position.close_order_id = Some(close_order_id.clone());
        self.store.update_position(position).await?;

        match self.await_fill(&close_order_id).await {
            Some(info) if info.status == OrderStatus::Filled => {
                let price = info.avg_fill_price.unwrap_or(sell_price);
                position.exit_reason = Some(reason);
                self.finalize_close(position, price, reason).await
            }
            Some(info) if info.filled_size > 0.0 => {
                // Partial close: book the sold part, stay OPEN with the rest
                let _ = self.executor.cancel(&close_order_id).await;
                let price = info.avg_fill_price.unwrap_or(sell_price);
                let realized = (price - position.entry_price) * info.filled_size;
                position.pnl = Some(position.pnl.unwrap_or(0.0) + realized);
                position.size -= info.filled_size;
                position.value = position.entry_price * position.size;
                position.close_order_id = None;
                tracing::warn!(
                    "partial close on position {}: sold {:.2}, {:.2} remains",
                    position.id,
                    info.filled_size,
                    position.size
                );
                self.store
                    .transition(position, PositionState::Open, Utc::now())
                    .await
            }
            _ => {
                let _ = self.executor.cancel(&close_order_id).await;
                position.close_order_id = None;
                tracing::warn!(
                    "close never filled, position {} back to OPEN for retry",
                    position.id
                );
                self.store
                    .transition(position, PositionState::Open, Utc::now())
                    .await
            }
        }
    }

    /// Decide what happened to a CLOSING position whose shares are gone.
    pub async fn probe_settlement(&self, position: &Position) -> SettlementVerdict {
        if let Some(tp_order_id) = &position.tp_order_id {
            if let Ok(info) = self.exchange.get_order(tp_order_id).await {
                if info.status == OrderStatus::Filled {
                    return SettlementVerdict::TakeProfitFilled {
                        price: info.avg_fill_price.unwrap_or(position.take_profit),
                    };
                }
            }
        }

        match self.exchange.get_balance(&position.token_id).await {
            Ok(balance) if balance < DUST_BALANCE => SettlementVerdict::SettledToZero,
            Ok(_) => SettlementVerdict::Ambiguous,
            Err(e) => {
                tracing::warn!("settlement probe could not read balance: {}", e);
                SettlementVerdict::Ambiguous
            }
        }
    }

    /// Apply the probe verdict to a CLOSING position. Ambiguous is a
    /// no-op: the position stays CLOSING and the sweeper will try again.
    pub async fn resolve_settlement(&self, position: &mut Position) -> Result<()> {
        match self.probe_settlement(position).await {
            SettlementVerdict::TakeProfitFilled { price } => {
                tracing::info!(
                    "🎯 position {} take-profit filled at {:.3} while closing",
                    position.id,
                    price
                );
                self.finalize_close(position, price, ExitReason::TakeProfit)
                    .await
            }
            SettlementVerdict::SettledToZero => {
                tracing::info!("position {} settled to zero", position.id);
                self.finalize_close(position, 0.0, ExitReason::Settled).await
            }
            SettlementVerdict::Ambiguous => {
                tracing::warn!(
                    "position {} settlement still ambiguous, staying CLOSING",
                    position.id
                );
                Ok(())
            }
        }
    }

    /// CLOSING -> CLOSED with a confirmed exit price; books PnL, daily
    /// stats and the exposure release.
    pub async fn finalize_close(
        &self,
        position: &mut Position,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<()> {
        let now = Utc::now();
        let realized = (exit_price - position.entry_price) * position.size;
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(reason);
        position.pnl = Some(position.pnl.unwrap_or(0.0) + realized);
        self.store
            .transition(position, PositionState::Closed, now)
            .await?;

        self.daily
            .lock()
            .unwrap()
            .record_close(position.pnl.unwrap_or(0.0), now);
        self.release_reservation(position.id);

        tracing::info!(
            "💰 position {} CLOSED {:?}: entry {:.3} exit {:.3} pnl {:+.2}",
            position.id,
            reason,
            position.entry_price,
            exit_price,
            position.pnl.unwrap_or(0.0)
        );
        Ok(())
    }

    /// CLOSING -> OPEN for a close that will be retried.
    pub async fn reopen_for_retry(&self, position: &mut Position) -> Result<()> {
        position.close_order_id = None;
        self.store
            .transition(position, PositionState::Open, Utc::now())
            .await
    }

    pub fn release_reservation(&self, position_id: i64) {
        if let Some(reservation) = self.reservations.lock().unwrap().remove(&position_id) {
            reservation.release();
        }
    }

    /// Poll an order until it fills or the confirmation deadline passes.
    /// Read failures are tolerated; the next poll re-queries.
    async fn await_fill(&self, order_id: &str) -> Option<OrderInfo> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.fill_confirm_secs);
        let mut last: Option<OrderInfo> = None;

        loop {
            match self.exchange.get_order(order_id).await {
                Ok(info) => {
                    if info.status == OrderStatus::Filled {
                        return Some(info);
                    }
                    if info.status.is_terminal() {
                        return Some(info);
                    }
                    last = Some(info);
                }
                Err(e) => tracing::debug!("fill poll failed: {}", e),
            }

            if tokio::time::Instant::now() >= deadline {
                return last;
            }
            tokio::time::sleep(FILL_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Vote, WindowId};
    use chrono::TimeZone;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::load().unwrap())
    }

    async fn manager_for_exit_tests() -> PositionLifecycleManager {
        // Exit evaluation is pure; the I/O collaborators are never touched
        let settings = settings();
        let exchange: Arc<dyn ExchangeApi> = Arc::new(NullExchange);
        let executor = Arc::new(OrderExecutor::new(
            exchange.clone(),
            crate::execution::executor::RetryPolicy::default(),
        ));
        let store = Arc::new(temp_store().await);
        PositionLifecycleManager::new(
            exchange,
            executor,
            store,
            ExposureLedger::new(100.0, 0, 10, 20),
            settings,
            DailyStats::new(Utc::now()),
        )
    }

    // A throwaway on-disk store; exit tests never write to it
    async fn temp_store() -> Store {
        let path = std::env::temp_dir().join(format!(
            "quorumbot_lifecycle_{}_{}.db",
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite://{}", path.display());
        Store::new(&url).await.unwrap()
    }

    struct NullExchange;

    #[async_trait::async_trait]
    impl ExchangeApi for NullExchange {
        async fn place_order(&self, _r: &OrderRequest) -> std::result::Result<String, ExchangeError> {
            Err(ExchangeError::Transient("null".into()))
        }
        async fn cancel_order(&self, _o: &str) -> std::result::Result<bool, ExchangeError> {
            Ok(true)
        }
        async fn get_order(&self, _o: &str) -> std::result::Result<OrderInfo, ExchangeError> {
            Err(ExchangeError::Transient("null".into()))
        }
        async fn get_order_by_intent(
            &self,
            _k: &str,
        ) -> std::result::Result<Option<OrderInfo>, ExchangeError> {
            Ok(None)
        }
        async fn get_balance(&self, _t: &str) -> std::result::Result<f64, ExchangeError> {
            Ok(0.0)
        }
        async fn get_quote(
            &self,
            _t: &str,
        ) -> std::result::Result<crate::feed::FeedMessage, ExchangeError> {
            Err(ExchangeError::Transient("null".into()))
        }
    }

    fn open_position() -> Position {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 0).unwrap();
        Position {
            id: 1,
            window: WindowId::containing(now),
            token_id: "tok".to_string(),
            side: Direction::Long,
            entry_price: 0.40,
            size: 6.0,
            value: 2.4,
            state: PositionState::Open,
            take_profit: 0.50,
            stop_loss: 0.28,
            peak_price: 0.40,
            entry_order_id: Some("e1".to_string()),
            tp_order_id: None,
            close_order_id: None,
            exit_price: None,
            exit_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            risk_multiplier: 1.0,
            metrics: EntryMetrics::default(),
            vote_snapshot: "{}".to_string(),
            pnl: None,
        }
    }

    #[tokio::test]
    async fn test_take_profit_trigger() {
        let manager = manager_for_exit_tests().await;
        let p = open_position();
        let now = p.created_at;

        assert_eq!(
            manager.evaluate_exit(&p, 0.52, now),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(manager.evaluate_exit(&p, 0.45, now), None);
    }

    #[tokio::test]
    async fn test_stop_loss_and_ceiling() {
        let manager = manager_for_exit_tests().await;
        let mut p = open_position();
        let now = p.created_at;

        assert_eq!(
            manager.evaluate_exit(&p, 0.27, now),
            Some(ExitReason::StopLoss)
        );

        p.take_profit = 0.99;
        assert_eq!(
            manager.evaluate_exit(&p, 0.96, now),
            Some(ExitReason::Ceiling)
        );
    }

    #[tokio::test]
    async fn test_trailing_stop_needs_activation() {
        let manager = manager_for_exit_tests().await;
        let mut p = open_position();
        p.take_profit = 0.99; // keep TP out of the way
        let now = p.created_at;

        // Peak below activation (+12% of 0.40 = 0.448): no trailing exit
        p.peak_price = 0.44;
        assert_eq!(manager.evaluate_exit(&p, 0.42, now), None);

        // Activated peak, price 5% below it: trailing fires
        p.peak_price = 0.46;
        assert_eq!(
            manager.evaluate_exit(&p, 0.43, now),
            Some(ExitReason::TrailingStop)
        );
    }

    #[tokio::test]
    async fn test_window_expiry_forces_exit() {
        let manager = manager_for_exit_tests().await;
        let p = open_position();
        let after_end = p.window.end() + chrono::Duration::seconds(1);

        assert_eq!(
            manager.evaluate_exit(&p, 0.41, after_end),
            Some(ExitReason::WindowExpiry)
        );
    }

    fn decision_with_votes(confidence: f64, weights: &[f64]) -> Decision {
        let votes = weights
            .iter()
            .map(|&w| Vote {
                source: "test".to_string(),
                direction: Direction::Long,
                confidence,
                weight: w,
                reason: String::new(),
            })
            .collect();
        Decision {
            direction: Direction::Long,
            confidence,
            votes_for: weights.len(),
            votes_against: 0,
            total_votes: weights.len(),
            long_confidence: confidence,
            short_confidence: 0.0,
            votes,
        }
    }

    #[tokio::test]
    async fn test_entry_value_scales_with_vote_strength() {
        // Defaults: base 20, ceiling 60
        let manager = manager_for_exit_tests().await;

        // Thin support stays at the base band
        let weak = decision_with_votes(0.70, &[1.0, 1.0, 1.0]);
        let v = manager.entry_value(&weak, 1.0);
        assert!((v - 20.0 * 1.04).abs() < 1e-9);

        // Strength past 5.0 doubles the base
        let firm = decision_with_votes(0.70, &[3.0, 1.5, 1.0, 1.0, 1.0]);
        let v = manager.entry_value(&firm, 1.0);
        assert!((v - 40.0 * 1.04).abs() < 1e-9);

        // A near-unanimous pool with heavy order flow hits the ceiling
        let strong = decision_with_votes(0.90, &[3.0, 1.5, 1.0, 1.0, 1.0, 1.0, 0.9]);
        let v = manager.entry_value(&strong, 1.0);
        assert!((v - 60.0).abs() < 1e-9);

        // The risk multiplier scales the clamped result
        let v = manager.entry_value(&strong, 0.5);
        assert!((v - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_entry_value_never_sizes_below_base() {
        let manager = manager_for_exit_tests().await;
        let timid = decision_with_votes(0.40, &[1.0]);
        let v = manager.entry_value(&timid, 1.0);
        assert!((v - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_price_anti_spike() {
        let manager = manager_for_exit_tests().await;
        let quote = MarketSnapshot {
            token_id: "tok".to_string(),
            price: 0.50,
            best_bid: 0.30, // spiked-out bid
            best_ask: 0.52,
            server_time: Utc::now(),
            window: WindowId(0),
        };

        // Routine exits refuse to sell into the spike
        let price = manager.close_price(&quote, ExitReason::TakeProfit);
        assert!((price - 0.475).abs() < 1e-9);

        // A stop-loss takes whatever the bid is
        let price = manager.close_price(&quote, ExitReason::StopLoss);
        assert!((price - 0.30).abs() < 1e-9);
    }
}
