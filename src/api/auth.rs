use axum::{
    extract::{Query, State},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, ApiResult, AppState};
use crate::auth::{check_access, cookies, redirect_for, verify_password, Access, Claims};
use crate::models::User;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
    pub user: User,
    pub redirect: &'static str,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let email = payload.email.trim().to_lowercase();
    tracing::info!("Login attempt: {}", email);

    let user = state.db.get_user_by_email(&email).await?;

    let Some(user) = user.filter(|u| u.is_active) else {
        tracing::warn!("Failed login for {}: unknown or inactive", email);
        return Err(ApiError::InvalidCredentials);
    };

    let password_hash = user.password_hash.clone();
    let password = payload.password;
    let valid =
        tokio::task::spawn_blocking(move || verify_password(&password, &password_hash)).await?;

    if !valid {
        tracing::warn!("Failed login for {}: bad password", email);
        return Err(ApiError::InvalidCredentials);
    }

    let (token, expires_in) = state
        .tokens
        .issue(&user)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let jar = cookies::with_session(
        jar,
        token.clone(),
        &user,
        expires_in,
        state.config.auth.secure_cookies,
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!("Login successful: {} ({})", user.email, user.role);

    let redirect = user.role.home_path();
    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            token,
            expires_in,
            user,
            redirect,
        }),
    ))
}

/// POST /api/auth/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (
        cookies::clear_session(jar),
        Json(json!({ "success": true, "redirect": "/login" })),
    )
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let user = state
        .db
        .get_user(claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("account no longer active".to_string()))?;

    Ok(Json(json!({ "success": true, "user": user })))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub path: String,
}

/// GET /api/auth/check?path=
///
/// Route-guard decision for a frontend page, from the session cookie.
pub async fn check(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CheckQuery>,
) -> Json<Value> {
    let role = cookies::auth_token(&jar)
        .and_then(|token| state.tokens.validate(&token).ok())
        .map(|claims| claims.role);

    let access = check_access(&query.path, role);
    let redirect = redirect_for(&query.path, access, role);

    Json(json!({
        "path": query.path,
        "access": access,
        "allowed": matches!(access, Access::Public | Access::Allowed),
        "redirect": redirect,
    }))
}
