use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::db::NewSignal;
use crate::models::SignalStatus;
use crate::webhook::{fingerprint, parse_signal, secret_matches, strip_secret};

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// POST /api/webhooks/signal
pub async fn signal(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    ingest(&state, "signal", query, body).await
}

/// POST /webhook/signal1 (legacy TradingView alert URL)
pub async fn signal1(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    ingest(&state, "signal1", query, body).await
}

/// POST /api/webhooks/tradingview
pub async fn tradingview(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    ingest(&state, "tradingview", query, body).await
}

async fn ingest(state: &AppState, source: &str, query: WebhookQuery, body: Bytes) -> Response {
    match try_ingest(state, source, query, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn try_ingest(
    state: &AppState,
    source: &str,
    query: WebhookQuery,
    body: Bytes,
) -> Result<Response, ApiError> {
    let fp = fingerprint(&body);
    let mut payload = serde_json::from_slice::<Value>(&body).ok();

    // Secret travels in the body or as ?token=, and is never stored
    let presented = payload.as_mut().and_then(strip_secret).or(query.token);
    if let Some(expected) = &state.config.webhook.secret {
        let valid = presented
            .as_deref()
            .is_some_and(|presented| secret_matches(presented, expected));
        if !valid {
            tracing::warn!("Webhook {} rejected: bad or missing secret", source);
            return Err(ApiError::Unauthorized("invalid webhook secret".to_string()));
        }
    }

    let Some(payload) = payload else {
        let raw = json!({ "raw": String::from_utf8_lossy(&body) });
        let stored = state
            .db
            .insert_signal(NewSignal {
                source,
                raw_payload: &raw,
                parsed_data: None,
                status: SignalStatus::Rejected,
                error: Some(NOT_JSON),
                fingerprint: Some(&fp),
            })
            .await;

        // The sender gets its 400 even if the audit row could not be written
        let signal_id = match stored {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("Failed to store non-JSON webhook from {}: {}", source, e);
                None
            }
        };

        tracing::warn!("Webhook {} rejected: body is not JSON", source);
        return Ok(rejected(signal_id, NOT_JSON));
    };

    let mut claimed = false;
    if let Some(dedup) = &state.dedup {
        match dedup.first_seen(&fp).await {
            Ok(true) => claimed = true,
            Ok(false) => {
                tracing::info!("Webhook {} duplicate delivery {} ignored", source, &fp[..12]);
                return Ok(Json(json!({
                    "success": true,
                    "duplicate": true,
                    "signal_id": null,
                }))
                .into_response());
            }
            // Redis outage must not drop signals
            Err(e) => tracing::warn!("Dedup unavailable, accepting delivery: {}", e),
        }
    }

    let outcome = parse_signal(&payload);
    let (parsed_json, status, error) = match &outcome {
        Ok(parsed) => (
            Some(serde_json::to_value(parsed).map_err(|e| ApiError::Internal(e.to_string()))?),
            SignalStatus::Parsed,
            None,
        ),
        Err(e) => (None, SignalStatus::Rejected, Some(e.to_string())),
    };

    let stored = state
        .db
        .insert_signal(NewSignal {
            source,
            raw_payload: &payload,
            parsed_data: parsed_json.as_ref(),
            status,
            error: error.as_deref(),
            fingerprint: Some(&fp),
        })
        .await;

    let signal_id = match stored {
        Ok(id) => id,
        Err(e) => {
            // Release the fingerprint so the sender's retry is not taken for a duplicate
            if claimed {
                if let Some(dedup) = &state.dedup {
                    if let Err(forget_err) = dedup.forget(&fp).await {
                        tracing::warn!("Could not release dedup key {}: {}", &fp[..12], forget_err);
                    }
                }
            }
            return Err(e.into());
        }
    };

    match outcome {
        Ok(parsed) => {
            let queued = state.queue.try_enqueue(signal_id);

            tracing::info!(
                "Webhook {} accepted {} {} {} (queued: {})",
                source,
                signal_id,
                parsed.action,
                parsed.symbol,
                queued
            );

            Ok(Json(json!({
                "success": true,
                "signal_id": signal_id,
                "queued": queued,
            }))
            .into_response())
        }
        Err(e) => {
            tracing::warn!("Webhook {} rejected as {}: {}", source, signal_id, e);
            Ok(rejected(Some(signal_id), &e.to_string()))
        }
    }
}

const NOT_JSON: &str = "body is not valid JSON";

fn rejected(signal_id: Option<uuid::Uuid>, error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "signal_id": signal_id,
            "error": error,
        })),
    )
        .into_response()
}
