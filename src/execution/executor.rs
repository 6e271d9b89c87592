//! Idempotent order submission with bounded retry.
//!
//! Every intent carries a client-generated key that stays stable across
//! retries. Re-invoking `place` with a key that already produced an
//! order returns the existing handle instead of submitting again. An
//! ambiguous failure (timeout after possible acceptance) is never
//! resolved by guessing: the executor asks the exchange what actually
//! happened.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExchangeError;
use crate::exchange::{ExchangeApi, OrderRequest, OrderStatus};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeApi>,
    policy: RetryPolicy,
    /// intent key -> exchange order id, for idempotent re-invocation.
    submitted: Mutex<HashMap<String, String>>,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeApi>, policy: RetryPolicy) -> Self {
        Self {
            exchange,
            policy,
            submitted: Mutex::new(HashMap::new()),
        }
    }

    /// Submit an order, retrying transient failures with capped
    /// exponential backoff. Terminal errors surface immediately;
    /// exhaustion surfaces the last error.
    pub async fn place(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        if let Some(order_id) = self
            .submitted
            .lock()
            .unwrap()
            .get(&request.intent_key)
            .cloned()
        {
            tracing::debug!(
                "intent {} already submitted as order {}",
                request.intent_key,
                order_id
            );
            return Ok(order_id);
        }

        let mut backoff = self.policy.initial_backoff;
        let mut last_err = ExchangeError::Transient("no attempts made".to_string());

        for attempt in 1..=self.policy.max_attempts {
            match self.exchange.place_order(request).await {
                Ok(order_id) => {
                    self.remember(&request.intent_key, &order_id);
                    return Ok(order_id);
                }
                Err(e @ ExchangeError::Transient(_)) => {
                    tracing::warn!(
                        "place attempt {}/{} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        e
                    );
                    last_err = e;
                }
                Err(ExchangeError::Ambiguous(reason)) => {
                    tracing::warn!(
                        "place attempt {} ambiguous ({}), re-querying by intent",
                        attempt,
                        reason
                    );
                    match self.resolve_intent(&request.intent_key).await? {
                        Some(order_id) => {
                            self.remember(&request.intent_key, &order_id);
                            return Ok(order_id);
                        }
                        // Confirmed never accepted; safe to retry the submit
                        None => last_err = ExchangeError::Ambiguous(reason),
                    }
                }
                Err(e) => return Err(e),
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }
        }

        Err(last_err)
    }

    /// Cancel an order; `Ok(false)` means it was already terminal.
    pub async fn cancel(&self, order_id: &str) -> Result<bool, ExchangeError> {
        let mut backoff = self.policy.initial_backoff;
        let mut last_err = ExchangeError::Transient("no attempts made".to_string());

        for attempt in 1..=self.policy.max_attempts {
            match self.exchange.cancel_order(order_id).await {
                Ok(canceled) => return Ok(canceled),
                Err(e @ ExchangeError::Transient(_)) => {
                    tracing::warn!(
                        "cancel attempt {}/{} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        e
                    );
                    last_err = e;
                }
                Err(ExchangeError::Ambiguous(_)) => {
                    // Ask the book rather than assume
                    match self.exchange.get_order(order_id).await {
                        Ok(info) if info.status == OrderStatus::Canceled => return Ok(true),
                        Ok(info) if info.status.is_terminal() => return Ok(false),
                        Ok(_) => {
                            last_err =
                                ExchangeError::Transient("order still live after cancel".into())
                        }
                        Err(e) => last_err = e,
                    }
                }
                Err(e) => return Err(e),
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }
        }

        Err(last_err)
    }

    /// Authoritative lookup after an ambiguous submit. Retries transient
    /// lookup failures within the same policy; an ambiguous lookup is
    /// treated as transient here because the query itself is read-only.
    async fn resolve_intent(&self, intent_key: &str) -> Result<Option<String>, ExchangeError> {
        let mut backoff = self.policy.initial_backoff;
        let mut last_err = ExchangeError::Transient("no attempts made".to_string());

        for _ in 0..self.policy.max_attempts {
            match self.exchange.get_order_by_intent(intent_key).await {
                Ok(Some(info)) => return Ok(Some(info.order_id)),
                Ok(None) => return Ok(None),
                Err(e) if e.is_retryable() || e.is_ambiguous() => last_err = e,
                Err(e) => return Err(e),
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.policy.max_backoff);
        }

        Err(last_err)
    }

    fn remember(&self, intent_key: &str, order_id: &str) {
        self.submitted
            .lock()
            .unwrap()
            .insert(intent_key.to_string(), order_id.to_string());
    }
}
