//! API Route Handlers
//!
//! JSON request/response surface over the withdrawal pipeline and the
//! payout ledger. Every error maps through the orchestrator taxonomy:
//! 400 bad-input, 404 not-found, 409 conflict, 502 upstream, 500 internal.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::server::SharedAppState;
use crate::common::OrchestratorError;
use crate::oracle::{OracleError, PriceOracle};
use crate::types::Recipient;
use crate::withdrawal::finalizer::parse_address;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub investor: String,
    pub fund: String,
    pub percent: f64,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub withdrawal_id: String,
    /// Per-request override of the dust threshold, settlement base units
    pub dust_threshold: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub withdrawal_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub withdrawal_id: String,
    pub tx_ref: String,
    pub amount: u64,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UnwrapRequest {
    pub authority: String,
    pub fund: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordWithdrawalRequest {
    pub investor: String,
    pub fund: String,
    pub amount: u64,
    pub tx_ref: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub withdrawal_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct InvestorShare {
    pub wallet: String,
    pub shares: u64,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub fund: String,
    pub manager: String,
    /// Realized proceeds to distribute, settlement base units
    pub add_value: u64,
    pub perf_fee_bps: u16,
    pub investors: Vec<InvestorShare>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub fund: String,
    pub tx_ref: String,
    pub total_value: u64,
    pub recipients: Vec<Recipient>,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "defunds-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn handle_withdraw_start(
    State(state): State<SharedAppState>,
    Json(req): Json<StartRequest>,
) -> Response {
    match state
        .withdrawals
        .start(&req.investor, &req.fund, req.percent)
        .await
    {
        Ok((withdrawal, transaction)) => Json(json!({
            "success": true,
            "withdrawal_id": withdrawal.id,
            "status": withdrawal.status.to_string(),
            "fraction_bps": withdrawal.fraction_bps,
            "transaction": transaction,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_plan(
    State(state): State<SharedAppState>,
    Json(req): Json<PlanRequest>,
) -> Response {
    match state
        .withdrawals
        .plan(&req.withdrawal_id, req.dust_threshold)
        .await
    {
        Ok((withdrawal, plan, transactions)) => Json(json!({
            "success": true,
            "withdrawal_id": withdrawal.id,
            "status": withdrawal.status.to_string(),
            "items": plan.items,
            "transactions": transactions,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_finalize(
    State(state): State<SharedAppState>,
    Json(req): Json<FinalizeRequest>,
) -> Response {
    match state.finalizer.finalize(&req.withdrawal_id).await {
        Ok(transaction) => Json(json!({
            "success": true,
            "transaction": transaction,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_confirm(
    State(state): State<SharedAppState>,
    Json(req): Json<ConfirmRequest>,
) -> Response {
    match state
        .finalizer
        .confirm_finalize(&req.withdrawal_id, &req.tx_ref, req.amount, req.details)
        .await
    {
        Ok(recorded) => Json(json!({
            "success": true,
            "recorded": recorded,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_unwrap(
    State(state): State<SharedAppState>,
    Json(req): Json<UnwrapRequest>,
) -> Response {
    match state.finalizer.unwrap(&req.authority, &req.fund).await {
        Ok(transaction) => Json(json!({
            "success": true,
            "transaction": transaction,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_record(
    State(state): State<SharedAppState>,
    Json(req): Json<RecordWithdrawalRequest>,
) -> Response {
    let record = crate::types::WithdrawalRecord::new(req.fund, req.amount, req.tx_ref, req.details);
    match state.finalizer.record(&req.investor, record).await {
        Ok(recorded) => Json(json!({
            "success": true,
            "recorded": recorded,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_withdraw_fail(
    State(state): State<SharedAppState>,
    Json(req): Json<FailRequest>,
) -> Response {
    match state.withdrawals.fail(&req.withdrawal_id, &req.reason).await {
        Ok(withdrawal) => Json(json!({
            "success": true,
            "withdrawal_id": withdrawal.id,
            "status": withdrawal.status.to_string(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_funds_pay(
    State(state): State<SharedAppState>,
    Json(req): Json<PayRequest>,
) -> Response {
    let investors: Vec<(String, u64)> = req
        .investors
        .into_iter()
        .map(|i| (i.wallet, i.shares))
        .collect();

    match state
        .payments
        .pay(
            &req.fund,
            &req.manager,
            req.add_value,
            req.perf_fee_bps,
            &investors,
        )
        .await
    {
        Ok(plan) => Json(json!({
            "success": true,
            "split": plan.split,
            "batches": plan.batches,
            "transactions": plan.bundles,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_funds_pay_record(
    State(state): State<SharedAppState>,
    Json(req): Json<RecordPaymentRequest>,
) -> Response {
    match state
        .payments
        .record(&req.fund, &req.tx_ref, req.total_value, req.recipients)
        .await
    {
        Ok(recorded) => Json(json!({
            "success": true,
            "recorded": recorded,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_price(
    State(state): State<SharedAppState>,
    Path(asset): Path<String>,
) -> Response {
    let asset = match parse_address(&asset) {
        Ok(asset) => asset,
        Err(e) => return error_response(&e),
    };

    match state.oracle.get_price(&asset).await {
        Ok(point) => Json(json!({
            "success": true,
            "asset": asset.to_string(),
            "price_base_units": point.base_units,
            "observed_at": point.observed_at,
        }))
        .into_response(),
        Err(e) => oracle_error_response(e),
    }
}

/// Oracle errors ride the standard wire shape; a missing price is a 404,
/// everything else is an upstream failure
fn oracle_error_response(e: OracleError) -> Response {
    match e {
        OracleError::NoPrice(asset) => {
            error_response(&OrchestratorError::not_found(format!("price for asset {}", asset)))
        }
        other => error_response(&OrchestratorError::upstream(other.to_string())),
    }
}

/// Map an orchestrator error onto the wire error shape
pub fn error_response(e: &OrchestratorError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        Json(json!({
            "success": false,
            "error": e.to_string(),
            "code": e.error_code(),
        })),
    )
        .into_response()
}
