use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breakers to stop trading after a bad day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.10,  // -10% of bankroll per day
            max_consecutive_losses: 4, // 4 losses in a row
        }
    }
}

/// Realized results for the current UTC day, restored from the store at
/// startup and rolled over at midnight.
#[derive(Debug, Clone)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub realized_pnl: f64,
    pub trades: u32,
    pub wins: u32,
    pub consecutive_losses: u32,
}

impl DailyStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            realized_pnl: 0.0,
            trades: 0,
            wins: 0,
            consecutive_losses: 0,
        }
    }

    pub fn record_close(&mut self, pnl: f64, now: DateTime<Utc>) {
        self.maybe_rollover(now);
        self.realized_pnl += pnl;
        self.trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }
    }

    pub fn maybe_rollover(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.date {
            tracing::info!(
                "📅 daily stats rollover: {} trades, pnl {:+.2}",
                self.trades,
                self.realized_pnl
            );
            *self = Self::new(now);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyLoss,
    ConsecutiveLosses,
}

impl CircuitBreakers {
    pub fn check(&self, stats: &DailyStats, bankroll: f64) -> Result<(), CircuitBreakerTrip> {
        if bankroll > 0.0 && stats.realized_pnl / bankroll < -self.max_daily_loss_pct {
            return Err(CircuitBreakerTrip::DailyLoss);
        }

        if stats.consecutive_losses >= self.max_consecutive_losses {
            return Err(CircuitBreakerTrip::ConsecutiveLosses);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_loss_trips() {
        let breakers = CircuitBreakers::default();
        let mut stats = DailyStats::new(Utc::now());
        stats.record_close(-120.0, Utc::now());

        let result = breakers.check(&stats, 1000.0);
        assert_eq!(result, Err(CircuitBreakerTrip::DailyLoss));
    }

    #[test]
    fn test_consecutive_losses_trip_and_reset() {
        let breakers = CircuitBreakers::default();
        let mut stats = DailyStats::new(Utc::now());

        for _ in 0..4 {
            stats.record_close(-1.0, Utc::now());
        }
        assert_eq!(
            breakers.check(&stats, 1000.0),
            Err(CircuitBreakerTrip::ConsecutiveLosses)
        );

        // One winner resets the streak
        stats.record_close(5.0, Utc::now());
        assert!(breakers.check(&stats, 1000.0).is_ok());
    }

    #[test]
    fn test_rollover_clears_the_day() {
        let mut stats = DailyStats::new("2026-03-01T23:50:00Z".parse().unwrap());
        stats.record_close(-200.0, "2026-03-01T23:55:00Z".parse().unwrap());
        assert_eq!(stats.trades, 1);

        stats.maybe_rollover("2026-03-02T00:01:00Z".parse().unwrap());
        assert_eq!(stats.trades, 0);
        assert_eq!(stats.realized_pnl, 0.0);
    }

    #[test]
    fn test_clean_day_passes() {
        let breakers = CircuitBreakers::default();
        let stats = DailyStats::new(Utc::now());
        assert!(breakers.check(&stats, 1000.0).is_ok());
    }
}
