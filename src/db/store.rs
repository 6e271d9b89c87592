use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::memory::SessionRecord;
use crate::models::{
    Direction, EntryMetrics, ExitReason, Position, PositionState, WindowId,
};
use crate::risk::DailyStats;
use crate::Result;

const BUSY_RETRIES: u32 = 5;

/// SQLite persistence for positions.
///
/// Writers funnel through one pool with a busy-retry wrapper; readers
/// run concurrently under WAL. Rows are append-only: positions are
/// updated in place through their lifecycle but never deleted.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        tracing::info!("Connected to SQLite at {}", database_url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                window INTEGER NOT NULL,
                token_id TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                size REAL NOT NULL,
                value REAL NOT NULL,
                state TEXT NOT NULL,
                take_profit REAL NOT NULL,
                stop_loss REAL NOT NULL,
                peak_price REAL NOT NULL,
                entry_order_id TEXT,
                tp_order_id TEXT,
                close_order_id TEXT,
                exit_price REAL,
                exit_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT,
                risk_multiplier REAL NOT NULL,
                rsi REAL,
                cvd_5m REAL NOT NULL DEFAULT 0,
                cvd_1m REAL NOT NULL DEFAULT 0,
                minutes_to_expiry INTEGER NOT NULL DEFAULT 0,
                vote_snapshot TEXT NOT NULL,
                pnl REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_positions_state ON positions(state)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retry a write that lost the single-writer race.
    async fn with_busy_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut backoff = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!("database busy, retry {}/{}", attempt, BUSY_RETRIES);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(500));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Insert a new position and fill in its assigned id.
    pub async fn insert_position(&self, position: &mut Position) -> Result<i64> {
        let result = self
            .with_busy_retry(|| {
                sqlx::query(
                    r#"
                    INSERT INTO positions (
                        window, token_id, side, entry_price, size, value, state,
                        take_profit, stop_loss, peak_price,
                        entry_order_id, tp_order_id, close_order_id,
                        exit_price, exit_reason, created_at, updated_at, closed_at,
                        risk_multiplier, rsi, cvd_5m, cvd_1m, minutes_to_expiry,
                        vote_snapshot, pnl
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                            ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
                    "#,
                )
                .bind(position.window.0)
                .bind(&position.token_id)
                .bind(position.side.as_str())
                .bind(position.entry_price)
                .bind(position.size)
                .bind(position.value)
                .bind(position.state.as_str())
                .bind(position.take_profit)
                .bind(position.stop_loss)
                .bind(position.peak_price)
                .bind(&position.entry_order_id)
                .bind(&position.tp_order_id)
                .bind(&position.close_order_id)
                .bind(position.exit_price)
                .bind(position.exit_reason.map(|r| r.as_str()))
                .bind(position.created_at)
                .bind(position.updated_at)
                .bind(position.closed_at)
                .bind(position.risk_multiplier)
                .bind(position.metrics.rsi)
                .bind(position.metrics.cvd_5m)
                .bind(position.metrics.cvd_1m)
                .bind(position.metrics.minutes_to_expiry)
                .bind(&position.vote_snapshot)
                .bind(position.pnl)
                .execute(&self.pool)
            })
            .await?;

        position.id = result.last_insert_rowid();
        tracing::debug!("inserted position {} ({})", position.id, position.side.as_str());
        Ok(position.id)
    }

    /// Persist the mutable part of a position.
    pub async fn update_position(&self, position: &Position) -> Result<()> {
        self.with_busy_retry(|| {
            sqlx::query(
                r#"
                UPDATE positions SET
                    entry_price = ?1, size = ?2, value = ?3, state = ?4,
                    take_profit = ?5, stop_loss = ?6, peak_price = ?7,
                    entry_order_id = ?8, tp_order_id = ?9, close_order_id = ?10,
                    exit_price = ?11, exit_reason = ?12, updated_at = ?13,
                    closed_at = ?14, pnl = ?15
                WHERE id = ?16
                "#,
            )
            .bind(position.entry_price)
            .bind(position.size)
            .bind(position.value)
            .bind(position.state.as_str())
            .bind(position.take_profit)
            .bind(position.stop_loss)
            .bind(position.peak_price)
            .bind(&position.entry_order_id)
            .bind(&position.tp_order_id)
            .bind(&position.close_order_id)
            .bind(position.exit_price)
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.updated_at)
            .bind(position.closed_at)
            .bind(position.pnl)
            .bind(position.id)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    /// Move a position to `next`, enforcing the transition graph, and
    /// persist it.
    pub async fn transition(
        &self,
        position: &mut Position,
        next: PositionState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !position.state.can_transition_to(next) {
            return Err(format!(
                "illegal transition {} -> {} for position {}",
                position.state.as_str(),
                next.as_str(),
                position.id
            )
            .into());
        }
        tracing::info!(
            "position {}: {} -> {}",
            position.id,
            position.state.as_str(),
            next.as_str()
        );
        position.state = next;
        position.updated_at = now;
        if next.is_terminal() {
            position.closed_at = Some(now);
        }
        self.update_position(position).await
    }

    /// All positions not yet terminal (PENDING, OPEN, CLOSING).
    pub async fn active_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("state IN ('pending', 'open', 'closing')")
            .await
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("state = 'open'").await
    }

    pub async fn closing_positions(&self) -> Result<Vec<Position>> {
        self.positions_where("state = 'closing'").await
    }

    async fn positions_where(&self, predicate: &str) -> Result<Vec<Position>> {
        let sql = format!(
            "SELECT * FROM positions WHERE {} ORDER BY created_at ASC",
            predicate
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_position).collect()
    }

    /// Closed positions reduced to similarity-scan records, newest first.
    pub async fn closed_sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT side, entry_price, pnl, rsi, cvd_5m, cvd_1m, minutes_to_expiry
            FROM positions
            WHERE state = 'closed'
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let side_str: String = row.get("side");
            let side = match side_str.as_str() {
                "LONG" => Direction::Long,
                _ => Direction::Short,
            };
            let cvd_5m: f64 = row.get("cvd_5m");
            let cvd_1m: f64 = row.get("cvd_1m");
            records.push(SessionRecord {
                side,
                entry_price: row.get("entry_price"),
                pnl: row.get::<Option<f64>, _>("pnl").unwrap_or(0.0),
                rsi: row.get::<Option<f64>, _>("rsi").unwrap_or(50.0),
                cvd: cvd_5m * 0.7 + cvd_1m * 0.3,
                minutes_to_expiry: row.get("minutes_to_expiry"),
            });
        }
        Ok(records)
    }

    /// Rebuild today's realized stats from closed rows, for the circuit
    /// breakers after a restart.
    pub async fn restore_daily_stats(&self, now: DateTime<Utc>) -> Result<DailyStats> {
        let rows = sqlx::query(
            r#"
            SELECT pnl, closed_at FROM positions
            WHERE state = 'closed' AND closed_at IS NOT NULL
            ORDER BY closed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DailyStats::new(now);
        for row in rows {
            let closed_at: DateTime<Utc> = row.get("closed_at");
            if closed_at.date_naive() != now.date_naive() {
                continue;
            }
            let pnl: f64 = row.get::<Option<f64>, _>("pnl").unwrap_or(0.0);
            stats.record_close(pnl, closed_at);
        }
        Ok(stats)
    }
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
    let side_str: String = row.get("side");
    let side = match side_str.as_str() {
        "LONG" => Direction::Long,
        "SHORT" => Direction::Short,
        other => return Err(format!("invalid side {:?}", other).into()),
    };

    let state_str: String = row.get("state");
    let state = PositionState::parse(&state_str)
        .ok_or_else(|| format!("invalid state {:?}", state_str))?;

    let exit_reason = match row.get::<Option<String>, _>("exit_reason") {
        Some(s) => {
            Some(ExitReason::parse(&s).ok_or_else(|| format!("invalid exit reason {:?}", s))?)
        }
        None => None,
    };

    Ok(Position {
        id: row.get("id"),
        window: WindowId(row.get("window")),
        token_id: row.get("token_id"),
        side,
        entry_price: row.get("entry_price"),
        size: row.get("size"),
        value: row.get("value"),
        state,
        take_profit: row.get("take_profit"),
        stop_loss: row.get("stop_loss"),
        peak_price: row.get("peak_price"),
        entry_order_id: row.get("entry_order_id"),
        tp_order_id: row.get("tp_order_id"),
        close_order_id: row.get("close_order_id"),
        exit_price: row.get("exit_price"),
        exit_reason,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        closed_at: row.get("closed_at"),
        risk_multiplier: row.get("risk_multiplier"),
        metrics: EntryMetrics {
            rsi: row.get("rsi"),
            cvd_5m: row.get("cvd_5m"),
            cvd_1m: row.get("cvd_1m"),
            minutes_to_expiry: row.get("minutes_to_expiry"),
        },
        vote_snapshot: row.get("vote_snapshot"),
        pnl: row.get("pnl"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position(window: WindowId) -> Position {
        let now = Utc::now();
        Position {
            id: 0,
            window,
            token_id: "tok-yes".to_string(),
            side: Direction::Long,
            entry_price: 0.40,
            size: 10.0,
            value: 4.0,
            state: PositionState::Pending,
            take_profit: 0.50,
            stop_loss: 0.28,
            peak_price: 0.40,
            entry_order_id: Some("ord-1".to_string()),
            tp_order_id: None,
            close_order_id: None,
            exit_price: None,
            exit_reason: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            risk_multiplier: 1.0,
            metrics: EntryMetrics {
                rsi: Some(55.0),
                cvd_5m: 80_000.0,
                cvd_1m: 10_000.0,
                minutes_to_expiry: 7,
            },
            vote_snapshot: "{}".to_string(),
            pnl: None,
        }
    }

    async fn temp_store(name: &str) -> Store {
        let path = std::env::temp_dir().join(format!("quorumbot_{}_{}.db", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        Store::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load_roundtrip() {
        let store = temp_store("roundtrip").await;
        let mut p = sample_position(WindowId(100));

        let id = store.insert_position(&mut p).await.unwrap();
        assert!(id > 0);

        let active = store.active_positions().await.unwrap();
        assert_eq!(active.len(), 1);
        let loaded = &active[0];
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.side, Direction::Long);
        assert_eq!(loaded.state, PositionState::Pending);
        assert_eq!(loaded.metrics.minutes_to_expiry, 7);
        assert!((loaded.entry_price - 0.40).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_transition_graph_enforced() {
        let store = temp_store("transitions").await;
        let mut p = sample_position(WindowId(100));
        store.insert_position(&mut p).await.unwrap();

        // PENDING -> CLOSED is not a legal edge
        let err = store
            .transition(&mut p, PositionState::Closed, Utc::now())
            .await;
        assert!(err.is_err());
        assert_eq!(p.state, PositionState::Pending);

        store
            .transition(&mut p, PositionState::Open, Utc::now())
            .await
            .unwrap();
        store
            .transition(&mut p, PositionState::Closing, Utc::now())
            .await
            .unwrap();

        // Failed close retries back to OPEN
        store
            .transition(&mut p, PositionState::Open, Utc::now())
            .await
            .unwrap();

        store
            .transition(&mut p, PositionState::Closing, Utc::now())
            .await
            .unwrap();
        store
            .transition(&mut p, PositionState::Closed, Utc::now())
            .await
            .unwrap();
        assert!(p.closed_at.is_some());

        assert!(store.active_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_sessions_and_daily_stats() {
        let store = temp_store("sessions").await;
        let now = Utc::now();

        for i in 0..3 {
            let mut p = sample_position(WindowId(100 + i));
            store.insert_position(&mut p).await.unwrap();
            store.transition(&mut p, PositionState::Open, now).await.unwrap();
            store
                .transition(&mut p, PositionState::Closing, now)
                .await
                .unwrap();
            p.exit_price = Some(0.50);
            p.exit_reason = Some(ExitReason::TakeProfit);
            p.pnl = Some(if i == 2 { -1.0 } else { 1.0 });
            store.transition(&mut p, PositionState::Closed, now).await.unwrap();
        }

        let sessions = store.closed_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 3);
        // Combined CVD = 0.7*80k + 0.3*10k
        assert!((sessions[0].cvd - 59_000.0).abs() < 1e-6);

        let stats = store.restore_daily_stats(now).await.unwrap();
        assert_eq!(stats.trades, 3);
        assert_eq!(stats.wins, 2);
        assert!((stats.realized_pnl - 1.0).abs() < 1e-9);
        // The loss was the most recent close
        assert_eq!(stats.consecutive_losses, 1);
    }
}
