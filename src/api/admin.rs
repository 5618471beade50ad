use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiError, ApiResult, AppState};
use crate::auth::hash_password;
use crate::db::NewUser;
use crate::exchange::{client_for_key, diagnose_key};
use crate::models::{UserRole, ValidationStatus};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// GET /api/admin/dashboard
pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.db.dashboard_stats().await?;

    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "queue_depth": state.queue.depth(),
        "live_trading": state.config.trading.live,
    })))
}

/// GET /api/admin/users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let users = state.db.list_users().await?;
    Ok(Json(json!({ "success": true, "count": users.len(), "users": users })))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
    pub referred_by: Option<Uuid>,
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<Json<Value>> {
    let email = payload.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest(format!("invalid email: {}", email)));
    }

    let role: UserRole = payload
        .role
        .parse()
        .map_err(|e: crate::models::UnknownVariant| ApiError::BadRequest(e.to_string()))?;

    if let Some(referrer) = payload.referred_by {
        if state.db.get_user(referrer).await?.is_none() {
            return Err(ApiError::BadRequest(format!("unknown referrer {}", referrer)));
        }
    }

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await?
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let user = state
        .db
        .create_user(NewUser {
            email: &email,
            name: payload.name.trim(),
            password_hash: &password_hash,
            role,
            referred_by: payload.referred_by,
        })
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict(format!("{} is already registered", email)),
            other => other,
        })?;

    tracing::info!("Created {} account {}", user.role, user.email);

    Ok(Json(json!({ "success": true, "user": user })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /api/admin/signals?limit=
pub async fn list_signals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let signals = state.db.list_recent_signals(limit).await?;

    Ok(Json(json!({ "success": true, "count": signals.len(), "signals": signals })))
}

/// GET /api/admin/signals/:id
pub async fn get_signal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let signal = state
        .db
        .get_signal(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("signal {}", id)))?;
    let orders = state.db.orders_for_signal(id).await?;

    Ok(Json(json!({ "success": true, "signal": signal, "orders": orders })))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub status: Option<String>,
}

/// GET /api/admin/api-keys?status=
pub async fn list_api_keys(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ValidationStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let keys = state.db.list_api_keys_by_status(status).await?;

    Ok(Json(json!({ "success": true, "count": keys.len(), "api_keys": keys })))
}

/// POST /api/admin/api-keys/:id/validate
pub async fn validate_api_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let key = state
        .db
        .get_api_key(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("API key {}", id)))?;

    let client = client_for_key(&key, &state.config.exchange, state.limiter.clone());
    let check = diagnose_key(client.as_ref(), state.config.exchange.recv_window_ms).await;

    state
        .db
        .set_validation_status(key.id, check.status, Some(&check.message))
        .await?;

    tracing::info!(
        "Validated {} key {}: {} ({})",
        key.exchange,
        key.masked_key(),
        check.status,
        check.message
    );

    Ok(Json(json!({ "success": true, "api_key_id": key.id, "check": check })))
}
