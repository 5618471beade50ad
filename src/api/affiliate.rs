use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use super::{ApiResult, AppState};
use crate::auth::Claims;

/// GET /api/affiliate/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let referrals = state.db.count_referrals(claims.sub).await?;

    Ok(Json(json!({
        "success": true,
        "referral_code": claims.sub,
        "referrals": referrals,
    })))
}
