use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use super::AppState;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/health
pub async fn api_health(State(state): State<AppState>) -> Json<Value> {
    let database = database_state(&state).await;
    let status = if database == "up" { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "database": database,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "live_trading": state.config.trading.live,
        "queue_depth": state.queue.depth(),
        "dedup": state.dedup.is_some(),
        "database": database_state(&state).await,
    }))
}

async fn database_state(state: &AppState) -> &'static str {
    match state.db.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!("Database ping failed: {}", e);
            "down"
        }
    }
}
