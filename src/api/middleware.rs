//! API Middleware - Rate Limiting and Request Correlation
//!
//! Keyed sliding-window rate limiting over an injectable counter store. The
//! limiter is constructed and wired into the router by the server; nothing
//! here is a process-wide singleton, so tests and multi-instance deployments
//! can supply their own store.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::Instrument;

use super::server::SharedAppState;
use crate::logging;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-key hit log backing the sliding-window limiter
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record a hit for `key` at `now` (epoch seconds) and return every hit
    /// inside the trailing window `(now - window, now]`, oldest first.
    async fn record(&self, key: &str, now: u64, window: u64) -> Vec<u64>;

    /// Drop keys whose most recent hit is older than `cutoff`
    async fn cleanup(&self, cutoff: u64);
}

/// In-memory counter store
///
/// Hit logs self-prune on every touch; `cleanup` sweeps keys that went
/// idle entirely.
#[derive(Default)]
pub struct InMemoryCounterStore {
    hits: RwLock<HashMap<String, Vec<u64>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record(&self, key: &str, now: u64, window: u64) -> Vec<u64> {
        let mut hits = self.hits.write().await;
        let log = hits.entry(key.to_string()).or_default();

        let floor = now.saturating_sub(window);
        log.retain(|&t| t > floor);
        log.push(now);
        log.clone()
    }

    async fn cleanup(&self, cutoff: u64) {
        let mut hits = self.hits.write().await;
        hits.retain(|_, log| log.last().map_or(false, |&t| t >= cutoff));
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after: u64,
}

/// Keyed sliding-window rate limiter over any counter store
///
/// Every request is checked against the trailing window ending now, so the
/// budget never resets wholesale at a boundary; it reopens one aged-out hit
/// at a time.
pub struct RateLimiter<C> {
    config: RateLimitConfig,
    counters: C,
}

impl<C: CounterStore> RateLimiter<C> {
    pub fn new(config: RateLimitConfig, counters: C) -> Self {
        Self { config, counters }
    }

    /// Check whether a request from `key` is allowed right now
    pub async fn check(&self, key: &str) -> Result<(), RateLimitExceeded> {
        self.check_at(key, epoch_secs()).await
    }

    async fn check_at(&self, key: &str, now: u64) -> Result<(), RateLimitExceeded> {
        let window = self.config.window.as_secs().max(1);
        let hits = self.counters.record(key, now, window).await;

        if hits.len() as u32 <= self.config.max_requests {
            Ok(())
        } else {
            // The window reopens when the oldest in-window hit ages out
            let oldest = hits.first().copied().unwrap_or(now);
            Err(RateLimitExceeded {
                retry_after: (oldest + window).saturating_sub(now).max(1),
            })
        }
    }

    /// Drop keys idle for more than a full window
    pub async fn cleanup(&self) {
        let window = self.config.window.as_secs().max(1);
        self.counters
            .cleanup(epoch_secs().saturating_sub(window))
            .await;
    }
}

/// Derive the rate-limit key for a request
///
/// API key header wins, then forwarded client address, then a shared bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return format!("key:{}", key);
    }
    if let Some(addr) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return format!("ip:{}", addr.trim());
    }
    "anonymous".to_string()
}

/// Axum middleware applying the app's rate limiter to every request
pub async fn rate_limit(
    State(state): State<SharedAppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(request.headers());

    match state.rate_limiter.check(&key).await {
        Ok(()) => next.run(request).await,
        Err(exceeded) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "error": "rate limit exceeded",
                "code": "RATE_LIMITED",
                "retry_after": exceeded.retry_after,
            })),
        )
            .into_response(),
    }
}

/// Attach a correlation ID to the request span and echo it on the response
///
/// Honors a caller-supplied `x-request-id`, otherwise generates one.
pub async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(logging::generate_correlation_id);

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter<InMemoryCounterStore> {
        RateLimiter::new(
            RateLimitConfig {
                max_requests: max,
                window: Duration::from_secs(window_secs),
            },
            InMemoryCounterStore::new(),
        )
    }

    #[tokio::test]
    async fn test_limit_within_window() {
        let limiter = limiter(3, 60);

        for i in 0..3 {
            assert!(limiter.check_at("client", 1_000_000 + i).await.is_ok());
        }
        let err = limiter.check_at("client", 1_000_010).await.unwrap_err();
        assert!(err.retry_after <= 60);
    }

    #[tokio::test]
    async fn test_window_slides_rather_than_resets() {
        let limiter = limiter(2, 60);

        assert!(limiter.check_at("client", 30).await.is_ok());
        assert!(limiter.check_at("client", 50).await.is_ok());

        // A fixed window would reset at 60; the trailing window still holds
        // both earlier hits
        let err = limiter.check_at("client", 70).await.unwrap_err();
        assert_eq!(err.retry_after, 20); // hit at 30 ages out at 90

        // Once every earlier hit has aged out the key recovers
        assert!(limiter.check_at("client", 131).await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60);

        assert!(limiter.check_at("a", 1_000_000).await.is_ok());
        assert!(limiter.check_at("b", 1_000_000).await.is_ok());
        assert!(limiter.check_at("a", 1_000_001).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_keys() {
        let store = InMemoryCounterStore::new();
        store.record("old", 100, 60).await;
        store.record("fresh", 10_000, 60).await;

        store.cleanup(5_000).await;

        // The idle key was swept, the fresh one keeps its log
        assert_eq!(store.record("old", 10_000, 60).await.len(), 1);
        assert_eq!(store.record("fresh", 10_000, 60).await.len(), 2);
    }

    #[test]
    fn test_client_key_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "anonymous");

        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers), "ip:10.0.0.1");

        headers.insert("x-api-key", "abc123".parse().unwrap());
        assert_eq!(client_key(&headers), "key:abc123");
    }
}
