//! HTTP handlers
//!
//! Thin ingress over the services: deserialize, delegate, wrap in the
//! `{success, data}` envelope. Errors surface through `AppError`'s
//! `IntoResponse` as `{error, message}` with the mapped status code.

use crate::error::AppError;
use crate::holdings::HoldingsTracker;
use crate::jobs::JobManager;
use crate::models::PairTradeSignal;
use crate::trigger::TriggerService;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state behind every route
pub struct EngineState {
    pub trigger: Arc<TriggerService>,
    pub holdings: Arc<HoldingsTracker>,
    pub job_manager: Arc<JobManager>,
}

/// Build the API router
pub fn router(state: Arc<EngineState>) -> Router {
    Router::new()
        .route("/triggers/pair-trade", post(pair_trade_handler))
        .route("/strategies/:id/portfolio", get(portfolio_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// POST /triggers/pair-trade
async fn pair_trade_handler(
    State(state): State<Arc<EngineState>>,
    Json(signal): Json<PairTradeSignal>,
) -> Result<Json<Value>, AppError> {
    let result = state.trigger.process_pair_trade_signal(&signal).await?;
    Ok(Json(json!({
        "success": true,
        "data": result,
    })))
}

/// GET /strategies/:id/portfolio
async fn portfolio_handler(
    State(state): State<Arc<EngineState>>,
    Path(strategy_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let value = state.holdings.calculate_portfolio_value(&strategy_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": value,
    })))
}

/// GET /health
async fn health_handler(State(state): State<Arc<EngineState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "jobs": state.job_manager.job_ids().await.len(),
    }))
}
