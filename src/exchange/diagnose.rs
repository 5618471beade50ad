use super::ExchangeClient;
use crate::models::ValidationStatus;
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of probing one set of exchange credentials
#[derive(Debug, Clone, Serialize)]
pub struct KeyCheck {
    pub status: ValidationStatus,
    pub message: String,
    /// Local clock minus exchange clock
    pub clock_skew_ms: Option<i64>,
    pub usdt_balance: Option<Decimal>,
}

/// Probe a key: unsigned server time first, then a signed balance read
///
/// Never fails. Transport problems come back as `pending` so the key is
/// retried later rather than being marked bad.
pub async fn diagnose_key(client: &dyn ExchangeClient, recv_window_ms: u64) -> KeyCheck {
    let exchange = client.exchange();
    let mut notes = Vec::new();

    let clock_skew_ms = match client.server_time_ms().await {
        Ok(server_ms) => {
            let skew = super::signing::timestamp_ms() as i64 - server_ms;
            if skew.unsigned_abs() > recv_window_ms {
                notes.push(format!(
                    "clock skew {}ms exceeds recv window {}ms",
                    skew, recv_window_ms
                ));
            }
            Some(skew)
        }
        Err(e) => {
            tracing::warn!("{} server time unavailable: {}", exchange, e);
            notes.push(format!("server time unavailable: {}", e));
            None
        }
    };

    match client.usdt_balance().await {
        Ok(balance) => {
            notes.insert(0, format!("ok, USDT balance {}", balance.normalize()));
            KeyCheck {
                status: ValidationStatus::Valid,
                message: notes.join("; "),
                clock_skew_ms,
                usdt_balance: Some(balance),
            }
        }
        Err(e) => {
            let status = e.validation_status();
            let mut message = e.to_string();
            if let Some(hint) = e.hint() {
                message = format!("{} ({})", message, hint);
            }
            notes.insert(0, message);

            KeyCheck {
                status,
                message: notes.join("; "),
                clock_skew_ms,
                usdt_balance: None,
            }
        }
    }
}
