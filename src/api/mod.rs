// HTTP surface: dashboards, auth and webhook ingress
pub mod admin;
pub mod affiliate;
pub mod auth;
pub mod error;
pub mod health;
pub mod routes;
pub mod user;
pub mod webhook;

pub use error::ApiError;
pub use routes::router;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;

use crate::auth::TokenIssuer;
use crate::config::AppConfig;
use crate::db::PostgresPersistence;
use crate::dedup::SignalDeduper;
use crate::exchange::ExchangeRateLimiter;
use crate::pipeline::SignalQueue;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub db: PostgresPersistence,
    pub tokens: Arc<TokenIssuer>,
    pub queue: SignalQueue,
    pub dedup: Option<SignalDeduper>,
    pub limiter: Arc<ExchangeRateLimiter>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl FromRef<AppState> for Arc<TokenIssuer> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
