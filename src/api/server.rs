//! API Server
//!
//! Axum application builder and startup: wires the live collaborators
//! (RPC ledger client, routing-service client, SQLite stores, price oracle)
//! into shared state, builds the router with CORS and rate limiting, and
//! serves.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::middleware::{self, InMemoryCounterStore, RateLimitConfig, RateLimiter};
use super::routes;
use crate::common::Result;
use crate::config::OrchestratorConfig;
use crate::ledger::RpcLedgerClient;
use crate::oracle::{CachingOracle, HttpPriceOracle};
use crate::payment::PaymentLedger;
use crate::router_client::RouteQuoteClient;
use crate::storage::{
    PaymentStore, SqliteStore, WithdrawalHistoryStore, WithdrawalStateStore,
};
use crate::withdrawal::finalizer::parse_address;
use crate::withdrawal::{
    FinalizationCoordinator, LiquidationPlanner, TransactionAssembler, WithdrawalService,
};

/// Price cache staleness window
const PRICE_MAX_STALENESS: Duration = Duration::from_secs(30);

/// How often idle rate-limit keys are swept
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Combined application state for all API endpoints
pub struct AppState {
    pub withdrawals: WithdrawalService<RpcLedgerClient, RouteQuoteClient, RouteQuoteClient>,
    pub finalizer: FinalizationCoordinator<RpcLedgerClient>,
    pub payments: PaymentLedger<RpcLedgerClient>,
    pub oracle: CachingOracle<HttpPriceOracle>,
    pub rate_limiter: RateLimiter<InMemoryCounterStore>,
    pub config: OrchestratorConfig,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

impl AppState {
    /// Wire the live collaborators from configuration
    pub fn new(config: OrchestratorConfig) -> Result<SharedAppState> {
        let program_id = parse_address(&config.program_id)?;
        let settlement_mint = parse_address(&config.settlement_mint)?;
        let treasury = parse_address(&config.treasury)?;

        let ledger = Arc::new(RpcLedgerClient::new(&config.solana_rpc, &config.program_id)?);
        let router = RouteQuoteClient::new(
            &config.router_api,
            Duration::from_secs(config.quote_timeout_secs),
        );

        let store = Arc::new(SqliteStore::new(&config.db_path)?);
        let states: Arc<dyn WithdrawalStateStore> = store.clone();
        let history: Arc<dyn WithdrawalHistoryStore> = store.clone();
        let payments_store: Arc<dyn PaymentStore> = store;

        let planner = LiquidationPlanner::new(router.clone(), settlement_mint, &config);
        let assembler = TransactionAssembler::new(
            ledger.clone(),
            Arc::new(router.clone()),
            program_id,
            settlement_mint,
            &config,
        );
        let withdrawals = WithdrawalService::new(
            ledger.clone(),
            states.clone(),
            planner,
            assembler,
            program_id,
            &config,
        );
        let finalizer = FinalizationCoordinator::new(
            ledger.clone(),
            states,
            history,
            program_id,
            settlement_mint,
            treasury,
            &config,
        );
        let payments = PaymentLedger::new(
            ledger,
            payments_store,
            program_id,
            settlement_mint,
            treasury,
            &config,
        );
        let oracle = CachingOracle::new(
            HttpPriceOracle::new(
                &config.router_api,
                Duration::from_secs(config.quote_timeout_secs),
            ),
            PRICE_MAX_STALENESS,
        );
        let rate_limiter = RateLimiter::new(RateLimitConfig::default(), InMemoryCounterStore::new());

        Ok(Arc::new(Self {
            withdrawals,
            finalizer,
            payments,
            oracle,
            rate_limiter,
            config,
        }))
    }
}

/// Build the application router
pub fn create_router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::handle_health))
        .route("/api/withdraw/start", post(routes::handle_withdraw_start))
        .route("/api/withdraw/plan", post(routes::handle_withdraw_plan))
        .route(
            "/api/withdraw/finalize",
            post(routes::handle_withdraw_finalize),
        )
        .route(
            "/api/withdraw/confirm",
            post(routes::handle_withdraw_confirm),
        )
        .route("/api/withdraw/unwrap", post(routes::handle_withdraw_unwrap))
        .route("/api/withdraw/record", post(routes::handle_withdraw_record))
        .route("/api/withdraw/fail", post(routes::handle_withdraw_fail))
        .route("/api/funds/pay", post(routes::handle_funds_pay))
        .route(
            "/api/funds/pay/record",
            post(routes::handle_funds_pay_record),
        )
        .route("/api/prices/:asset", get(routes::handle_price))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn start_server(state: SharedAppState) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            sweeper.rate_limiter.cleanup().await;
        }
    });

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "API server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> SharedAppState {
        let mut config = OrchestratorConfig::from_env().unwrap();
        config.db_path = dir
            .path()
            .join("api-test.db")
            .to_string_lossy()
            .into_owned();

        AppState::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_caller_request_id_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
