//! Operational JSON API.
//!
//! Read-only view of the ledger and agent status for dashboards and
//! scripts. Serves JSON only; rendering is someone else's problem.

pub mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::ledger::Ledger;
use crate::llm::TextGenerator;
use crate::types::TickReport;

pub struct AppState {
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub ledger: Arc<Ledger>,
    pub generator: Arc<dyn TextGenerator>,
    pub last_tick: Arc<RwLock<Option<TickReport>>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/trades", get(routes::trades))
        .route("/api/analyses", get(routes::analyses))
        .route("/api/outcomes", get(routes::outcomes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
    info!(%addr, "Dashboard listening");
    axum::serve(listener, app)
        .await
        .context("Dashboard server failed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
