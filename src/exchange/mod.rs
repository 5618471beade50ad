// Exchange REST access: signing, clients and key diagnosis
pub mod binance;
pub mod bybit;
pub mod diagnose;
pub mod error;
pub mod signing;
mod transport;

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use diagnose::{diagnose_key, KeyCheck};
pub use error::ExchangeError;

use crate::config::ExchangeSettings;
use crate::models::{ApiKeyRecord, Exchange, OrderSide};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Shared limiter for all outbound exchange calls
pub type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub fn new_rate_limiter(requests_per_minute: u32) -> Arc<ExchangeRateLimiter> {
    let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))
}

/// Market order sent on behalf of a user
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Idempotency key on the exchange side (max 36 chars)
    pub client_order_id: String,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Exchange clock in milliseconds (unsigned call)
    async fn server_time_ms(&self) -> Result<i64, ExchangeError>;

    /// Signed account call; proves the credentials work
    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Place a market order, returning the exchange order id
    async fn place_market_order(&self, order: &OrderRequest) -> Result<String, ExchangeError>;
}

/// Build the right client for a stored key
pub fn client_for_key(
    key: &ApiKeyRecord,
    settings: &ExchangeSettings,
    limiter: Arc<ExchangeRateLimiter>,
) -> Box<dyn ExchangeClient> {
    client_for(
        key.exchange,
        &key.api_key,
        &key.secret_key,
        key.testnet,
        settings,
        limiter,
    )
}

/// Build a client from raw credentials
pub fn client_for(
    exchange: Exchange,
    api_key: &str,
    secret_key: &str,
    testnet: bool,
    settings: &ExchangeSettings,
    limiter: Arc<ExchangeRateLimiter>,
) -> Box<dyn ExchangeClient> {
    match exchange {
        Exchange::Bybit => {
            let base_url = if testnet {
                &settings.bybit_testnet_url
            } else {
                &settings.bybit_base_url
            };
            Box::new(BybitClient::new(
                base_url,
                api_key,
                secret_key,
                settings.recv_window_ms,
                limiter,
            ))
        }
        Exchange::Binance => {
            let base_url = if testnet {
                &settings.binance_testnet_url
            } else {
                &settings.binance_base_url
            };
            Box::new(BinanceClient::new(
                base_url,
                api_key,
                secret_key,
                settings.recv_window_ms,
                limiter,
            ))
        }
    }
}

/// Exchange-side order id derived from our order id
pub fn client_order_id(order_id: uuid::Uuid) -> String {
    format!("cbc{}", order_id.simple())
}

/// Format a quantity without exponent or trailing zeros
pub(crate) fn format_quantity(quantity: Decimal) -> String {
    quantity.normalize().to_string()
}

/// Signed calls need both halves of the key pair
pub(crate) fn require_credentials(
    exchange: Exchange,
    api_key: &str,
    api_secret: &str,
) -> Result<(), ExchangeError> {
    if api_key.trim().is_empty() || api_secret.trim().is_empty() {
        return Err(ExchangeError::MissingCredentials(exchange));
    }
    Ok(())
}

/// Parse a decimal string field; exchanges send "" for zero
pub(crate) fn parse_decimal(value: &str) -> Result<Decimal, ExchangeError> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    value
        .trim()
        .parse()
        .map_err(|e| ExchangeError::Decode(format!("bad decimal {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_order_id_fits_exchange_limits() {
        let id = client_order_id(uuid::Uuid::new_v4());
        assert!(id.len() <= 36);
        assert!(id.starts_with("cbc"));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(Decimal::new(1000, 6)), "0.001");
        assert_eq!(format_quantity(Decimal::new(25, 0)), "25");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("").unwrap(), Decimal::ZERO);
        assert_eq!(parse_decimal("12.50").unwrap(), Decimal::new(125, 1));
        assert!(parse_decimal("n/a").is_err());
    }

    #[test]
    fn test_require_credentials() {
        assert!(require_credentials(Exchange::Bybit, "key", "secret").is_ok());

        let err = require_credentials(Exchange::Binance, "key", "  ").unwrap_err();
        assert!(matches!(err, ExchangeError::MissingCredentials(Exchange::Binance)));
        assert_eq!(err.validation_status(), crate::models::ValidationStatus::Invalid);
        assert!(err.hint().is_some());

        assert!(require_credentials(Exchange::Bybit, "", "secret").is_err());
    }

    #[test]
    fn test_client_for_picks_exchange() {
        let settings = crate::config::AppConfig::from_env().unwrap().exchange;
        let limiter = new_rate_limiter(60);

        let bybit = client_for(Exchange::Bybit, "k", "s", true, &settings, limiter.clone());
        assert_eq!(bybit.exchange(), Exchange::Bybit);

        let binance = client_for(Exchange::Binance, "k", "s", false, &settings, limiter);
        assert_eq!(binance.exchange(), Exchange::Binance);
    }
}
