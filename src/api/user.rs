use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult, AppState};
use crate::auth::Claims;
use crate::exchange::{client_for_key, diagnose_key};
use crate::models::Exchange;

const RECENT_ORDERS: i64 = 20;

/// GET /api/user/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let balances = state.db.get_balances(claims.sub).await?;
    let api_keys = state.db.list_api_keys(claims.sub).await?;
    let orders = state.db.orders_for_user(claims.sub, RECENT_ORDERS).await?;
    let orders_today = state.db.count_orders_today(claims.sub).await?;

    Ok(Json(json!({
        "success": true,
        "balances": balances,
        "api_keys": api_keys,
        "recent_orders": orders,
        "orders_today": orders_today,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyRequest {
    pub exchange: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub testnet: bool,
}

/// POST /api/user/api-keys
///
/// Stores the credentials, then probes them straight away.
pub async fn add_api_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ApiKeyRequest>,
) -> ApiResult<Json<Value>> {
    let exchange: Exchange = payload
        .exchange
        .parse()
        .map_err(|e: crate::models::UnknownVariant| ApiError::BadRequest(e.to_string()))?;

    if payload.api_key.trim().is_empty() || payload.secret_key.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "api_key and secret_key are required".to_string(),
        ));
    }

    let key = state
        .db
        .upsert_api_key(
            claims.sub,
            exchange,
            &payload.api_key,
            &payload.secret_key,
            payload.testnet,
        )
        .await?;

    let client = client_for_key(&key, &state.config.exchange, state.limiter.clone());
    let check = diagnose_key(client.as_ref(), state.config.exchange.recv_window_ms).await;

    state
        .db
        .set_validation_status(key.id, check.status, Some(&check.message))
        .await?;

    let key = state.db.get_api_key(key.id).await?.unwrap_or(key);

    Ok(Json(json!({ "success": true, "api_key": key, "check": check })))
}
