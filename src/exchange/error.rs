use crate::models::{Exchange, ValidationStatus};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("{exchange} API error {code}: {message}")]
    Api {
        exchange: Exchange,
        code: i64,
        message: String,
    },
    #[error("{exchange} returned HTTP {status}: {body}")]
    Status {
        exchange: Exchange,
        status: u16,
        body: String,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("gave up after {0} attempts")]
    RetriesExhausted(u32),
    #[error("{0} API key or secret is missing")]
    MissingCredentials(Exchange),
}

impl ExchangeError {
    /// Map a failed key check onto the stored validation status
    ///
    /// Credential problems are `invalid`, fixable account settings (IP
    /// whitelist, permissions, expiry) are `needs_update`, and anything
    /// transient stays `pending`.
    pub fn validation_status(&self) -> ValidationStatus {
        match self {
            ExchangeError::Api { exchange, code, .. } => match (exchange, code) {
                (Exchange::Bybit, 10003) | (Exchange::Bybit, 10004) => ValidationStatus::Invalid,
                (Exchange::Bybit, 10005) | (Exchange::Bybit, 10010) | (Exchange::Bybit, 33004) => {
                    ValidationStatus::NeedsUpdate
                }
                (Exchange::Binance, -2014) | (Exchange::Binance, -1022) => ValidationStatus::Invalid,
                (Exchange::Binance, -2015) => ValidationStatus::NeedsUpdate,
                _ => ValidationStatus::Pending,
            },
            ExchangeError::Status { status: 401, .. } => ValidationStatus::Invalid,
            ExchangeError::MissingCredentials(_) => ValidationStatus::Invalid,
            ExchangeError::Status { status: 403, .. } => ValidationStatus::NeedsUpdate,
            _ => ValidationStatus::Pending,
        }
    }

    /// Human hint for the diagnosis report
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ExchangeError::Api { exchange: Exchange::Bybit, code: 10010, .. } => {
                Some("request IP is not on the key's whitelist")
            }
            ExchangeError::Api { exchange: Exchange::Bybit, code: 10003, .. } => {
                Some("API key does not exist or was deleted")
            }
            ExchangeError::Api { exchange: Exchange::Bybit, code: 10004, .. }
            | ExchangeError::Api { exchange: Exchange::Binance, code: -1022, .. } => {
                Some("signature mismatch; check the secret key")
            }
            ExchangeError::Api { exchange: Exchange::Bybit, code: 10005, .. } => {
                Some("key lacks the required permissions")
            }
            ExchangeError::Api { exchange: Exchange::Bybit, code: 33004, .. } => {
                Some("API key has expired")
            }
            ExchangeError::Api { exchange: Exchange::Binance, code: -2015, .. } => {
                Some("invalid key, IP not whitelisted, or missing permissions")
            }
            ExchangeError::Api { exchange: Exchange::Binance, code: -2014, .. } => {
                Some("API key format is invalid")
            }
            ExchangeError::Api { exchange: Exchange::Binance, code: -1021, .. } => {
                Some("timestamp outside recvWindow; check the server clock")
            }
            ExchangeError::MissingCredentials(_) => Some("store both the API key and the secret key"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(exchange: Exchange, code: i64) -> ExchangeError {
        ExchangeError::Api {
            exchange,
            code,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_bybit_classification() {
        assert_eq!(api(Exchange::Bybit, 10003).validation_status(), ValidationStatus::Invalid);
        assert_eq!(api(Exchange::Bybit, 10010).validation_status(), ValidationStatus::NeedsUpdate);
        assert_eq!(api(Exchange::Bybit, 33004).validation_status(), ValidationStatus::NeedsUpdate);
        assert_eq!(api(Exchange::Bybit, 10006).validation_status(), ValidationStatus::Pending);
    }

    #[test]
    fn test_binance_classification() {
        assert_eq!(api(Exchange::Binance, -2015).validation_status(), ValidationStatus::NeedsUpdate);
        assert_eq!(api(Exchange::Binance, -2014).validation_status(), ValidationStatus::Invalid);
        assert_eq!(api(Exchange::Binance, -1021).validation_status(), ValidationStatus::Pending);
        assert!(api(Exchange::Binance, -1021).hint().is_some());
    }

    #[test]
    fn test_status_and_transport_classification() {
        let unauthorized = ExchangeError::Status {
            exchange: Exchange::Bybit,
            status: 401,
            body: String::new(),
        };
        assert_eq!(unauthorized.validation_status(), ValidationStatus::Invalid);

        let forbidden = ExchangeError::Status {
            exchange: Exchange::Binance,
            status: 403,
            body: String::new(),
        };
        assert_eq!(forbidden.validation_status(), ValidationStatus::NeedsUpdate);

        assert_eq!(
            ExchangeError::RetriesExhausted(3).validation_status(),
            ValidationStatus::Pending
        );
    }

    #[test]
    fn test_error_display() {
        let err = api(Exchange::Bybit, 10010);
        assert_eq!(err.to_string(), "bybit API error 10010: test");
    }
}
