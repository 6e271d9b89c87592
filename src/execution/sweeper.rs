//! Reconciliation sweeper.
//!
//! The store is the book of record, the exchange is the ground truth.
//! The sweeper walks every non-terminal position and forces the two to
//! agree: orphaned PENDING entries are adopted or failed, stuck CLOSING
//! positions are settled or sent back for a retry, and positions that
//! outlived their window are wound down. It runs once at startup and
//! then on its own interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::Store;
use crate::exchange::{ExchangeApi, OrderStatus};
use crate::execution::{ActionGate, OrderExecutor, PositionLifecycleManager, SettlementVerdict};
use crate::models::{ExitReason, MarketSnapshot, Position, PositionState, WindowId};
use crate::Result;

/// Token balances below this count as no holdings.
const DUST_BALANCE: f64 = 0.01;

pub struct ReconciliationSweeper {
    store: Arc<Store>,
    exchange: Arc<dyn ExchangeApi>,
    executor: Arc<OrderExecutor>,
    lifecycle: Arc<PositionLifecycleManager>,
    actions: ActionGate,
    stuck_closing_secs: i64,
}

impl ReconciliationSweeper {
    pub fn new(
        store: Arc<Store>,
        exchange: Arc<dyn ExchangeApi>,
        executor: Arc<OrderExecutor>,
        lifecycle: Arc<PositionLifecycleManager>,
        actions: ActionGate,
        stuck_closing_secs: i64,
    ) -> Self {
        Self {
            store,
            exchange,
            executor,
            lifecycle,
            actions,
            stuck_closing_secs,
        }
    }

    /// Startup pass: restore exposure reservations for everything
    /// non-terminal, then reconcile immediately. A PENDING position here
    /// means the process died mid-entry, so its age is irrelevant.
    pub async fn startup(&self) -> Result<()> {
        let active = self.store.active_positions().await?;
        self.lifecycle.restore_reservations(&active);
        tracing::info!("🔎 startup reconciliation: {} active positions", active.len());

        for mut position in active {
            if let Err(e) = self.reconcile(&mut position, Utc::now(), true).await {
                tracing::error!("startup reconcile of position {} failed: {}", position.id, e);
            }
        }
        Ok(())
    }

    /// Periodic pass over everything non-terminal.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        for mut position in self.store.active_positions().await? {
            if let Err(e) = self.reconcile(&mut position, now, false).await {
                tracing::error!("reconcile of position {} failed: {}", position.id, e);
            }
        }
        Ok(())
    }

    /// One position per token: the monitor loop and the sweeper must never
    /// mutate the same position at the same time. Busy means some other
    /// action is mid-flight; the next sweep sees the settled state.
    async fn reconcile(
        &self,
        position: &mut Position,
        now: DateTime<Utc>,
        startup: bool,
    ) -> Result<()> {
        let _permit = match self.actions.try_acquire(position.id) {
            Some(p) => p,
            None => {
                tracing::debug!("position {} busy, sweep skips it", position.id);
                return Ok(());
            }
        };
        match position.state {
            PositionState::Pending if startup => self.reconcile_pending(position).await,
            PositionState::Pending => Ok(()), // the opener is still confirming
            PositionState::Open => self.reconcile_open(position, now).await,
            PositionState::Closing => self.reconcile_closing(position, now, startup).await,
            _ => Ok(()),
        }
    }

    /// An entry whose confirmation never finished. Believe the book: a
    /// fill becomes a live position, anything else is failed.
    async fn reconcile_pending(&self, position: &mut Position) -> Result<()> {
        let entry_order_id = match position.entry_order_id.clone() {
            Some(id) => id,
            None => {
                // Never submitted; nothing at the exchange to reconcile
                self.store
                    .transition(position, PositionState::Failed, Utc::now())
                    .await?;
                self.lifecycle.release_reservation(position.id);
                return Ok(());
            }
        };

        match self.exchange.get_order(&entry_order_id).await {
            Ok(info) if info.filled_size > 0.0 => {
                tracing::info!(
                    "adopting orphaned entry for position {}: filled {:.2}",
                    position.id,
                    info.filled_size
                );
                if !info.status.is_terminal() {
                    let _ = self.executor.cancel(&entry_order_id).await;
                }
                self.lifecycle.open_from_fill(position, &info).await
            }
            Ok(_) => {
                let _ = self.executor.cancel(&entry_order_id).await;
                tracing::warn!("orphaned entry for position {} never filled, failing", position.id);
                self.store
                    .transition(position, PositionState::Failed, Utc::now())
                    .await?;
                self.lifecycle.release_reservation(position.id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "cannot read orphaned entry order for position {}: {}, leaving PENDING",
                    position.id,
                    e
                );
                Ok(())
            }
        }
    }

    /// OPEN positions only need the sweeper once their window is over;
    /// everything before that is the monitor loop's job.
    async fn reconcile_open(&self, position: &mut Position, now: DateTime<Utc>) -> Result<()> {
        if position.window.seconds_remaining(now) > 0 {
            return Ok(());
        }

        tracing::warn!(
            "position {} outlived window {}, winding down",
            position.id,
            position.window
        );

        match self.exchange.get_quote(&position.token_id).await {
            Ok(quote) => {
                let snap = MarketSnapshot {
                    token_id: position.token_id.clone(),
                    price: quote.mid(),
                    best_bid: quote.best_bid,
                    best_ask: quote.best_ask,
                    server_time: quote.server_time,
                    window: WindowId::containing(quote.server_time),
                };
                let sell_price = self.lifecycle.close_price(&snap, ExitReason::WindowExpiry);
                self.lifecycle
                    .close(position, sell_price, ExitReason::WindowExpiry, now)
                    .await
            }
            Err(e) => {
                // No live quote after expiry usually means the market is
                // gone; move to CLOSING and let the settlement probe decide.
                tracing::warn!("no quote for expired position {}: {}", position.id, e);
                self.store
                    .transition(position, PositionState::Closing, now)
                    .await?;
                self.lifecycle.resolve_settlement(position).await
            }
        }
    }

    /// A CLOSING position that has been closing for too long. Settle it
    /// from evidence, or hand it back to the monitor loop for a fresh
    /// close attempt.
    async fn reconcile_closing(
        &self,
        position: &mut Position,
        now: DateTime<Utc>,
        startup: bool,
    ) -> Result<()> {
        let stuck_for = (now - position.updated_at).num_seconds();
        if !startup && stuck_for < self.stuck_closing_secs {
            return Ok(());
        }
        tracing::warn!(
            "position {} stuck CLOSING for {}s, reconciling",
            position.id,
            stuck_for
        );

        match self.lifecycle.probe_settlement(position).await {
            SettlementVerdict::TakeProfitFilled { price } => {
                self.lifecycle
                    .finalize_close(position, price, ExitReason::TakeProfit)
                    .await
            }
            SettlementVerdict::SettledToZero => {
                self.lifecycle
                    .finalize_close(position, 0.0, ExitReason::Settled)
                    .await
            }
            SettlementVerdict::Ambiguous => {
                // Shares may still be there. If they are, clear any stray
                // close order and put the position back in play.
                match self.exchange.get_balance(&position.token_id).await {
                    Ok(balance) if balance >= DUST_BALANCE => {
                        if let Some(close_order_id) = position.close_order_id.clone() {
                            let _ = self.executor.cancel(&close_order_id).await;
                        }
                        tracing::info!(
                            "position {} still holds {:.2}, back to OPEN for retry",
                            position.id,
                            balance
                        );
                        self.lifecycle.reopen_for_retry(position).await
                    }
                    _ => Ok(()), // stay CLOSING, next sweep tries again
                }
            }
        }
    }
}
