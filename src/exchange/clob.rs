use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{ExchangeApi, OrderInfo, OrderRequest};
use crate::error::ExchangeError;
use crate::feed::FeedMessage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// reqwest client for the CLOB-style exchange HTTP API.
#[derive(Clone)]
pub struct ClobClient {
    client: Client,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct PlaceResponse {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    canceled: bool,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// ============== Implementation ==============

impl ClobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// Classify a failed response by status and error code.
    async fn classify_response(response: reqwest::Response) -> ExchangeError {
        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
            code: String::new(),
            message: String::new(),
        });

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                if body.code == "INSUFFICIENT_BALANCE" {
                    ExchangeError::InsufficientBalance(body.message)
                } else {
                    ExchangeError::InvalidParameter(format!("{}: {}", body.code, body.message))
                }
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                ExchangeError::Transient(format!("{}: {}", s, body.message))
            }
            s => ExchangeError::InvalidParameter(format!("{}: {}", s, body.message)),
        }
    }

    /// Network-level failure on a submit: a timeout after the request was
    /// sent may still have been accepted, so it is ambiguous rather than
    /// transient.
    fn classify_send_error(e: reqwest::Error, submission: bool) -> ExchangeError {
        if submission && e.is_timeout() {
            ExchangeError::Ambiguous(format!("submit timed out: {}", e))
        } else {
            ExchangeError::Transient(e.to_string())
        }
    }
}

#[async_trait]
impl ExchangeApi for ClobClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        let url = format!("{}/order", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, true))?;

        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        let data: PlaceResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Ambiguous(format!("unreadable accept body: {}", e)))?;
        Ok(data.order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, ExchangeError> {
        let url = format!("{}/order/{}", self.base_url, order_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, false))?;

        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        let data: CancelResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok(data.canceled)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderInfo, ExchangeError> {
        let url = format!("{}/order/{}", self.base_url, order_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, false))?;

        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))
    }

    async fn get_order_by_intent(
        &self,
        intent_key: &str,
    ) -> Result<Option<OrderInfo>, ExchangeError> {
        let url = format!("{}/order/by-intent/{}", self.base_url, intent_key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, false))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ExchangeError::Transient(e.to_string()))
    }

    async fn get_balance(&self, token_id: &str) -> Result<f64, ExchangeError> {
        let url = format!("{}/balance/{}", self.base_url, token_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, false))?;

        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        let data: BalanceResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok(data.balance)
    }

    async fn get_quote(&self, token_id: &str) -> Result<FeedMessage, ExchangeError> {
        let url = format!("{}/quote/{}", self.base_url, token_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, false))?;

        if !response.status().is_success() {
            return Err(Self::classify_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, OrderStatus};

    fn request() -> OrderRequest {
        OrderRequest {
            intent_key: "intent-1".to_string(),
            token_id: "tok".to_string(),
            side: OrderSide::Buy,
            price: 0.55,
            size: 10.0,
        }
    }

    #[tokio::test]
    async fn test_place_order_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/order")
            .with_status(200)
            .with_body(r#"{"order_id":"abc-123"}"#)
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let order_id = client.place_order(&request()).await.unwrap();
        assert_eq!(order_id, "abc-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/order")
            .with_status(503)
            .with_body(r#"{"code":"BUSY","message":"try later"}"#)
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let err = client.place_order(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/order")
            .with_status(400)
            .with_body(r#"{"code":"INSUFFICIENT_BALANCE","message":"no shares"}"#)
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let err = client.place_order(&request()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance(_)));
    }

    #[tokio::test]
    async fn test_invalid_parameter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/order")
            .with_status(400)
            .with_body(r#"{"code":"BAD_SIZE","message":"size too small"}"#)
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let err = client.place_order(&request()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_get_order_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/order/abc-123")
            .with_status(200)
            .with_body(
                r#"{"order_id":"abc-123","status":"FILLED","avg_fill_price":0.54,"filled_size":10.0}"#,
            )
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let info = client.get_order("abc-123").await.unwrap();
        assert_eq!(info.status, OrderStatus::Filled);
        assert_eq!(info.avg_fill_price, Some(0.54));
    }

    #[tokio::test]
    async fn test_get_balance() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/balance/tok")
            .with_status(200)
            .with_body(r#"{"balance":12.5}"#)
            .create_async()
            .await;

        let client = ClobClient::new(server.url());
        let balance = client.get_balance("tok").await.unwrap();
        assert!((balance - 12.5).abs() < 1e-9);
    }
}
