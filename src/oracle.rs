//! Price Oracle
//!
//! Simple get-price contract over the external price service, with a
//! caller-side staleness window: a cached price older than the window
//! triggers a re-fetch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;

/// Oracle errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no price for asset: {0}")]
    NoPrice(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A price observation in settlement base units per whole asset unit
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub base_units: u64,
    /// Epoch seconds when the price was observed
    pub observed_at: u64,
}

/// Price source contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, asset: &Pubkey) -> Result<PricePoint, OracleError>;
}

/// HTTP price oracle against the routing service's price endpoint
#[derive(Debug, Clone)]
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_price(&self, asset: &Pubkey) -> Result<PricePoint, OracleError> {
        let url = format!("{}/price/v2", self.base_url);
        let value: Value = self
            .client
            .get(&url)
            .query(&[("ids", asset.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let price = value["data"][asset.to_string()]["price"]
            .as_str()
            .and_then(|p| p.parse::<f64>().ok())
            .ok_or_else(|| OracleError::NoPrice(asset.to_string()))?;

        if !price.is_finite() || price < 0.0 {
            return Err(OracleError::InvalidResponse(format!(
                "unusable price for {}: {}",
                asset, price
            )));
        }

        Ok(PricePoint {
            base_units: (price * 1e9) as u64,
            observed_at: epoch_secs(),
        })
    }
}

/// Staleness-window cache over any oracle
pub struct CachingOracle<O> {
    inner: O,
    max_staleness: Duration,
    cache: RwLock<HashMap<Pubkey, PricePoint>>,
}

impl<O: PriceOracle> CachingOracle<O> {
    pub fn new(inner: O, max_staleness: Duration) -> Self {
        Self {
            inner,
            max_staleness,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<O: PriceOracle> PriceOracle for CachingOracle<O> {
    async fn get_price(&self, asset: &Pubkey) -> Result<PricePoint, OracleError> {
        let now = epoch_secs();

        {
            let cache = self.cache.read().await;
            if let Some(point) = cache.get(asset) {
                if now.saturating_sub(point.observed_at) <= self.max_staleness.as_secs() {
                    return Ok(*point);
                }
            }
        }

        let point = self.inner.get_price(asset).await?;
        self.cache.write().await.insert(*asset, point);
        Ok(point)
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
