//! REST routes
//!
//! The read-only surface consumed by the UI and admin collaborators:
//! current round snapshot, recent outcome history, and the provably-fair
//! verifier. Wallet funding is glue for the external deposit flow.

use axum::{
    extract::{Json as AxumJson, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::oracle::{crash_point, RoundSeed};
use crate::engine::{OutcomeRecord, RoundSnapshot};
use crate::ledger::SettlementLedger;

use super::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_round_snapshot(
    State(state): State<AppState>,
) -> Result<Json<RoundSnapshot>, StatusCode> {
    match state.supervisor.snapshot().await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

pub async fn get_round_history(State(state): State<AppState>) -> Json<Vec<OutcomeRecord>> {
    Json(state.supervisor.history().await)
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// Revealed seed, 64 hex characters.
    pub seed: String,
    pub nonce: u64,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub commitment: String,
    pub crash_point: f64,
    pub nonce: u64,
}

/// Recompute a revealed round outcome so anyone can check the draw was
/// fixed before betting closed: the commitment must match the one
/// broadcast at WAITING entry, the crash point the one revealed at crash.
pub async fn get_round_verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, StatusCode> {
    let bytes = hex::decode(&query.seed).map_err(|_| StatusCode::BAD_REQUEST)?;
    let seed: [u8; 32] = bytes.try_into().map_err(|_| StatusCode::BAD_REQUEST)?;
    let round_seed = RoundSeed {
        seed,
        nonce: query.nonce,
    };
    Ok(Json(VerifyResponse {
        commitment: round_seed.commitment(),
        crash_point: crash_point(&seed, query.nonce, &state.crash_params),
        nonce: query.nonce,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub player_id: String,
    pub amount: f64,
}

/// Called by the external deposit flow once a payment confirms. Funding
/// only: settlement credits (payouts, refunds) go through the ledger
/// trait and are booked separately.
pub async fn post_wallet_deposit(
    State(state): State<AppState>,
    AxumJson(req): AxumJson<DepositRequest>,
) -> Result<Json<Value>, StatusCode> {
    if !(req.amount > 0.0) || !req.amount.is_finite() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .wallet
        .deposit(&req.player_id, req.amount)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let balance = state
        .wallet
        .balance(&req.player_id)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(json!({ "player_id": req.player_id, "balance": balance })))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub player_id: String,
}

pub async fn get_wallet_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<Value>, StatusCode> {
    let balance = state
        .wallet
        .balance(&query.player_id)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(json!({ "player_id": query.player_id, "balance": balance })))
}
