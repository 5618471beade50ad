use crate::models::SignalAction;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::str::FromStr;

const SYMBOL_KEYS: &[&str] = &["symbol", "ticker"];
const ACTION_KEYS: &[&str] = &["action", "signal", "side"];
const SECRET_KEYS: &[&str] = &["secret", "passphrase"];
const NESTED_KEYS: &[&str] = &["alert", "data"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalParseError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing symbol (expected `symbol` or `ticker`)")]
    MissingSymbol,
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),
    #[error("missing action (expected `action`, `signal` or `side`)")]
    MissingAction,
    #[error("unknown action: {0:?}")]
    UnknownAction(String),
    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

/// Normalized signal, stored as `parsed_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub symbol: String,
    pub action: SignalAction,
    pub price: Option<Decimal>,
    pub strategy: Option<String>,
    pub timeframe: Option<String>,
}

/// Parse a TradingView alert body into a normalized signal
pub fn parse_signal(payload: &Value) -> Result<ParsedSignal, SignalParseError> {
    let body = signal_object(payload)?;

    let raw_symbol = first_string(body, SYMBOL_KEYS).ok_or(SignalParseError::MissingSymbol)?;
    let symbol = normalize_symbol(&raw_symbol)?;

    let raw_action = first_string(body, ACTION_KEYS).ok_or(SignalParseError::MissingAction)?;
    let action = parse_action(&raw_action)?;

    let price = match body.get("price") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_price(value)?),
    };

    Ok(ParsedSignal {
        symbol,
        action,
        price,
        strategy: first_string(body, &["strategy"]),
        timeframe: first_string(body, &["timeframe", "interval"]),
    })
}

/// Some alert templates wrap the fields in `alert` or `data`
fn signal_object(payload: &Value) -> Result<&Map<String, Value>, SignalParseError> {
    let object = payload.as_object().ok_or(SignalParseError::NotAnObject)?;

    let has_fields = SYMBOL_KEYS.iter().chain(ACTION_KEYS).any(|k| object.contains_key(*k));
    if !has_fields {
        for key in NESTED_KEYS {
            if let Some(Value::Object(inner)) = object.get(*key) {
                return Ok(inner);
            }
        }
    }

    Ok(object)
}

/// First non-empty string among `keys`; numbers are accepted and stringified
fn first_string(body: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match body.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// `BINANCE:BTCUSDT.P` -> `BTCUSDT`, `btc/usdt` -> `BTCUSDT`
pub fn normalize_symbol(raw: &str) -> Result<String, SignalParseError> {
    let upper = raw.trim().to_ascii_uppercase();
    let without_prefix = upper.rsplit(':').next().unwrap_or_default();
    let without_suffix = without_prefix
        .strip_suffix(".P")
        .unwrap_or(without_prefix);

    let symbol: String = without_suffix
        .chars()
        .filter(|c| *c != '/' && *c != '-')
        .collect();

    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SignalParseError::InvalidSymbol(raw.to_string()));
    }

    Ok(symbol)
}

fn parse_action(raw: &str) -> Result<SignalAction, SignalParseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "buy" | "long" | "open_long" | "entry_long" => Ok(SignalAction::Buy),
        "sell" | "short" | "open_short" | "entry_short" => Ok(SignalAction::Sell),
        "close" | "exit" | "close_long" | "close_short" | "flat" => Ok(SignalAction::Close),
        _ => Err(SignalParseError::UnknownAction(raw.to_string())),
    }
}

fn parse_price(value: &Value) -> Result<Decimal, SignalParseError> {
    let price = match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .and_then(Decimal::from_f64),
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok(),
        _ => None,
    };

    match price {
        Some(p) if p > Decimal::ZERO => Ok(p.normalize()),
        _ => Err(SignalParseError::InvalidPrice(value.to_string())),
    }
}

/// Hex SHA-256 of the raw request body, used for duplicate detection
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Remove the shared secret from a payload before it is persisted
pub fn strip_secret(payload: &mut Value) -> Option<String> {
    let object = payload.as_object_mut()?;
    let mut found = None;
    for key in SECRET_KEYS {
        if let Some(value) = object.remove(*key) {
            if found.is_none() {
                found = value.as_str().map(str::to_string);
            }
        }
    }
    found
}

/// Compare a presented webhook secret with the configured one in constant time
///
/// Both sides key an HMAC over the same message and the tags are checked
/// with `verify_slice`, so timing does not depend on where they differ.
pub fn secret_matches(presented: &str, expected: &str) -> bool {
    let tag = |key: &str| {
        Hmac::<Sha256>::new_from_slice(key.as_bytes())
            .map(|mut mac| {
                mac.update(b"coinbitclub-webhook-secret");
                mac
            })
    };

    match (tag(expected), tag(presented)) {
        (Ok(expected), Ok(presented)) => {
            let expected = expected.finalize().into_bytes();
            presented.verify_slice(&expected).is_ok()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_basic_signal() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "action": "buy",
            "price": 43250.5,
            "strategy": "ema_cross",
            "timeframe": "15"
        });

        let signal = parse_signal(&payload).unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.price, Some(Decimal::from_str("43250.5").unwrap()));
        assert_eq!(signal.strategy.as_deref(), Some("ema_cross"));
        assert_eq!(signal.timeframe.as_deref(), Some("15"));
    }

    #[test]
    fn test_ticker_and_signal_fallbacks() {
        let payload = json!({
            "ticker": "BINANCE:ethusdt.P",
            "signal": "SHORT",
            "price": "2300.10",
            "timeframe": 60
        });

        let signal = parse_signal(&payload).unwrap();
        assert_eq!(signal.symbol, "ETHUSDT");
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.price, Some(Decimal::from_str("2300.1").unwrap()));
        assert_eq!(signal.timeframe.as_deref(), Some("60"));
    }

    #[test]
    fn test_close_aliases() {
        for action in ["close", "EXIT", "close_long", "flat"] {
            let payload = json!({"symbol": "SOLUSDT", "action": action});
            let signal = parse_signal(&payload).unwrap();
            assert_eq!(signal.action, SignalAction::Close, "action {}", action);
            assert_eq!(signal.price, None);
        }
    }

    #[test]
    fn test_nested_alert_object() {
        let payload = json!({"alert": {"symbol": "BTC/USDT", "side": "long"}});
        let signal = parse_signal(&payload).unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            parse_signal(&json!({"action": "buy"})),
            Err(SignalParseError::MissingSymbol)
        );
        assert_eq!(
            parse_signal(&json!({"symbol": "BTCUSDT", "action": "  "})),
            Err(SignalParseError::MissingAction)
        );
        assert_eq!(
            parse_signal(&json!(["BTCUSDT", "buy"])),
            Err(SignalParseError::NotAnObject)
        );
    }

    #[test]
    fn test_unknown_action() {
        let err = parse_signal(&json!({"symbol": "BTCUSDT", "action": "hodl"})).unwrap_err();
        assert_eq!(err, SignalParseError::UnknownAction("hodl".to_string()));
    }

    #[test]
    fn test_invalid_prices() {
        for price in [json!(0), json!(-5.0), json!("abc"), json!(true)] {
            let payload = json!({"symbol": "BTCUSDT", "action": "buy", "price": price});
            assert!(
                matches!(parse_signal(&payload), Err(SignalParseError::InvalidPrice(_))),
                "price {:?} should be rejected",
                payload["price"]
            );
        }

        let payload = json!({"symbol": "BTCUSDT", "action": "buy", "price": null});
        assert_eq!(parse_signal(&payload).unwrap().price, None);
    }

    #[test]
    fn test_invalid_symbols() {
        assert!(normalize_symbol("BTC USDT").is_err());
        assert!(normalize_symbol("BINANCE:").is_err());
        assert_eq!(normalize_symbol("bybit:xrp-usdt").unwrap(), "XRPUSDT");
    }

    #[test]
    fn test_parsed_signal_json_shape() {
        let signal = parse_signal(&json!({"symbol": "BTCUSDT", "action": "buy", "price": "100"}))
            .unwrap();
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["action"], "buy");
        assert_eq!(value["symbol"], "BTCUSDT");

        let back: ParsedSignal = serde_json::from_value(value).unwrap();
        assert_eq!(back, signal);
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = fingerprint(br#"{"symbol":"BTCUSDT","action":"buy"}"#);
        assert_eq!(
            fp,
            "43a747ef427118fae379ab071acebc1cd1ae1c7bf34eee94c6cd213a96d70450"
        );
    }

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cr3t", "s3cr3t"));
        assert!(!secret_matches("s3cr3", "s3cr3t"));
        assert!(!secret_matches("S3CR3T", "s3cr3t"));
        assert!(!secret_matches("", "s3cr3t"));
    }

    #[test]
    fn test_strip_secret() {
        let mut payload = json!({"symbol": "BTCUSDT", "action": "buy", "secret": "s3cr3t"});
        assert_eq!(strip_secret(&mut payload).as_deref(), Some("s3cr3t"));
        assert!(payload.get("secret").is_none());

        let mut no_secret = json!({"symbol": "BTCUSDT"});
        assert_eq!(strip_secret(&mut no_secret), None);
    }
}
