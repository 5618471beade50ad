use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use axum::http::HeaderValue;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{admin, affiliate, auth, health, user, webhook, AppState};
use crate::auth::require_auth;

pub fn router(state: AppState) -> Router {
    // Role checks happen in require_auth via the path guard
    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/admin/dashboard", get(admin::dashboard))
        .route(
            "/api/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/api/admin/signals", get(admin::list_signals))
        .route("/api/admin/signals/:id", get(admin::get_signal))
        .route("/api/admin/api-keys", get(admin::list_api_keys))
        .route(
            "/api/admin/api-keys/:id/validate",
            post(admin::validate_api_key),
        )
        .route("/api/user/dashboard", get(user::dashboard))
        .route("/api/user/api-keys", post(user::add_api_key))
        .route("/api/affiliate/dashboard", get(affiliate::dashboard))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/api/health", get(health::api_health))
        .route("/api/status", get(health::status))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check", get(auth::check))
        .route("/api/webhooks/signal", post(webhook::signal))
        .route("/webhook/signal1", post(webhook::signal1))
        .route("/api/webhooks/tradingview", post(webhook::tradingview));

    let cors = cors_layer(state.config.server.cors_origin_list());

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Credentialed CORS limited to the configured dashboard origins
fn cors_layer(origins: Vec<&str>) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
