use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::models::{PriceTick, Symbol};
use crate::Result;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Seam to the exchange-client collaborator: anything that can produce a
/// price sample for a symbol. Monitor workers treat a fetch failure as
/// "no update this cycle", never as fatal.
pub trait PriceSource: Send + Sync {
    fn fetch_price(
        &self,
        symbol: &Symbol,
    ) -> impl std::future::Future<Output = Result<PriceTick>> + Send;
}

/// REST price client.
///
/// Expects `GET {base_url}/price/{SYMBOL}` (slashes in the symbol become
/// dashes) to return `{"symbol": "...", "price": 1.23}`. Retries transient
/// failures with exponential backoff.
#[derive(Clone)]
pub struct RestPriceSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
}

impl RestPriceSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_once(&self, symbol: &Symbol) -> Result<PriceTick> {
        let url = format!(
            "{}/price/{}",
            self.base_url,
            symbol.as_str().replace('/', "-")
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(format!("price endpoint returned {}", response.status()).into());
        }
        let body: PriceResponse = response.json().await?;

        if !body.price.is_finite() || body.price <= 0.0 {
            return Err(format!("non-positive price {} for {}", body.price, symbol).into());
        }

        Ok(PriceTick {
            symbol: symbol.clone(),
            price: body.price,
            timestamp: Utc::now(),
        })
    }
}

impl PriceSource for RestPriceSource {
    async fn fetch_price(&self, symbol: &Symbol) -> Result<PriceTick> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.fetch_once(symbol).await {
                Ok(tick) => {
                    if attempt > 1 {
                        tracing::info!(symbol = %symbol, attempt, "Price fetch recovered");
                    }
                    return Ok(tick);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            symbol = %symbol,
                            attempt,
                            error = %last_error.as_ref().unwrap(),
                            backoff_ms,
                            "Price fetch failed, retrying"
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "all price fetch attempts failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_price_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/price/BTC-USDT")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol": "BTC/USDT", "price": 50000.5}"#)
            .create_async()
            .await;

        let source = RestPriceSource::new(&server.url());
        let tick = source.fetch_price(&Symbol::new("BTC/USDT")).await.unwrap();

        assert_eq!(tick.symbol, Symbol::new("BTC/USDT"));
        assert_eq!(tick.price, 50000.5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_price_exhausts_retries_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/price/ETH-USDT")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let source = RestPriceSource::new(&server.url());
        let result = source.fetch_price(&Symbol::new("ETH/USDT")).await;

        assert!(result.is_err());
        // Hit the endpoint once per attempt before giving up
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_price_rejects_bad_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/price/SOL-USDT")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol": "SOL/USDT", "price": -1.0}"#)
            .expect(3)
            .create_async()
            .await;

        let source = RestPriceSource::new(&server.url());
        let result = source.fetch_price(&Symbol::new("SOL/USDT")).await;
        assert!(result.is_err());
    }
}
