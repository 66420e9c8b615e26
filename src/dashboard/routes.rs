//! Route handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Serialize;
use tracing::error;

use super::AppState;
use crate::types::{AnalyzedTrade, BuyTrade, RealizedOutcome, TickReport};

/// Ledger failures surface as 500s with the message in the body.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Dashboard request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub agent: String,
    pub uptime_secs: i64,
    pub model: String,
    pub llm_cost_usd: f64,
    pub last_tick: Option<TickReport>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let last_tick = state.last_tick.read().await.clone();
    Json(StatusResponse {
        agent: state.agent_name.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        model: state.generator.model_name().to_string(),
        llm_cost_usd: state.generator.cumulative_cost(),
        last_tick,
    })
}

pub async fn trades(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BuyTrade>>, ApiError> {
    Ok(Json(state.ledger.list_buy_trades().await?))
}

pub async fn analyses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AnalyzedTrade>>, ApiError> {
    Ok(Json(state.ledger.list_analyzed_trades().await?))
}

pub async fn outcomes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RealizedOutcome>>, ApiError> {
    Ok(Json(state.ledger.list_realized_outcomes().await?))
}
