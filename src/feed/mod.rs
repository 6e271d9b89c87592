// Market data intake: last-write-wins quote book, price history,
// and the side-channel oracle file.
pub mod oracle;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MarketSnapshot, WindowId};

/// Raw quote message from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMessage {
    pub token_id: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub server_time: DateTime<Utc>,
}

impl FeedMessage {
    pub fn mid(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }
}

/// Last-write-wins book of the freshest quote per instrument.
///
/// The feed delivers duplicates and out-of-order messages; only the
/// newest `server_time` per token survives. Quotes older than the
/// freshness threshold are treated as absent.
#[derive(Debug, Default)]
pub struct PriceBook {
    quotes: HashMap<String, FeedMessage>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one feed message. Returns false when the message lost the
    /// last-write-wins race (stale or duplicate).
    pub fn apply(&mut self, msg: FeedMessage) -> bool {
        match self.quotes.get(&msg.token_id) {
            Some(existing) if existing.server_time >= msg.server_time => {
                tracing::debug!(
                    "dropping stale feed message for {} ({} <= {})",
                    msg.token_id,
                    msg.server_time,
                    existing.server_time
                );
                false
            }
            _ => {
                self.quotes.insert(msg.token_id.clone(), msg);
                true
            }
        }
    }

    /// Freshest quote for a token as a snapshot, or None when missing or
    /// older than `freshness_secs`.
    pub fn snapshot(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
        freshness_secs: i64,
    ) -> Option<MarketSnapshot> {
        let quote = self.quotes.get(token_id)?;
        if now - quote.server_time > Duration::seconds(freshness_secs) {
            tracing::debug!("quote for {} is stale, voiding tick", token_id);
            return None;
        }
        Some(MarketSnapshot {
            token_id: quote.token_id.clone(),
            price: quote.mid(),
            best_bid: quote.best_bid,
            best_ask: quote.best_ask,
            server_time: quote.server_time,
            window: WindowId::containing(quote.server_time),
        })
    }
}

/// Bounded rolling price history per instrument, feeding the voters'
/// momentum, RSI and VWAP arithmetic.
#[derive(Debug)]
pub struct PriceHistory {
    capacity: usize,
    points: HashMap<String, VecDeque<f64>>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: HashMap::new(),
        }
    }

    pub fn push(&mut self, token_id: &str, price: f64) {
        let buf = self
            .points
            .entry(token_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(price);
    }

    /// Last `n` prices in chronological order, fewer when the buffer is
    /// still warming up.
    pub fn last_n(&self, token_id: &str, n: usize) -> Vec<f64> {
        match self.points.get(token_id) {
            Some(buf) => buf.iter().rev().take(n).rev().copied().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, token_id: &str) -> usize {
        self.points.get(token_id).map_or(0, |b| b.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(token: &str, bid: f64, ask: f64, secs: i64) -> FeedMessage {
        FeedMessage {
            token_id: token.to_string(),
            best_bid: bid,
            best_ask: ask,
            server_time: Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut book = PriceBook::new();
        assert!(book.apply(msg("tok", 0.48, 0.52, 10)));

        // Out-of-order older message loses
        assert!(!book.apply(msg("tok", 0.40, 0.44, 5)));

        // Exact duplicate loses
        assert!(!book.apply(msg("tok", 0.48, 0.52, 10)));

        // Newer message wins
        assert!(book.apply(msg("tok", 0.49, 0.53, 11)));

        let now = Utc.timestamp_opt(1_760_000_000 + 12, 0).unwrap();
        let snap = book.snapshot("tok", now, 10).unwrap();
        assert!((snap.price - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_stale_quote_is_void() {
        let mut book = PriceBook::new();
        book.apply(msg("tok", 0.48, 0.52, 0));

        let now = Utc.timestamp_opt(1_760_000_000 + 60, 0).unwrap();
        assert!(book.snapshot("tok", now, 10).is_none());

        let fresh_now = Utc.timestamp_opt(1_760_000_000 + 5, 0).unwrap();
        assert!(book.snapshot("tok", fresh_now, 10).is_some());
    }

    #[test]
    fn test_price_history_bounded() {
        let mut history = PriceHistory::new(3);
        for p in [0.1, 0.2, 0.3, 0.4] {
            history.push("tok", p);
        }
        assert_eq!(history.last_n("tok", 10), vec![0.2, 0.3, 0.4]);
        assert_eq!(history.last_n("tok", 2), vec![0.3, 0.4]);
        assert!(history.last_n("other", 2).is_empty());
    }
}
