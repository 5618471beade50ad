use super::signing::{build_query, bybit_signature, timestamp_ms};
use super::transport::{send_with_retry, ORDER_ATTEMPTS, READ_ATTEMPTS};
use super::{format_quantity, parse_decimal, require_credentials, ExchangeClient, ExchangeError, ExchangeRateLimiter, OrderRequest};
use crate::models::{Exchange, OrderSide};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bybit V5 REST client for a single key
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
    limiter: Arc<ExchangeRateLimiter>,
}

/// Every V5 response is wrapped in this envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    time_second: String,
}

#[derive(Debug, Deserialize)]
struct WalletBalance {
    #[serde(default)]
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrder<'a> {
    category: &'a str,
    symbol: &'a str,
    side: &'a str,
    order_type: &'a str,
    qty: String,
    order_link_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    order_id: String,
}

impl BybitClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        api_secret: &str,
        recv_window: u64,
        limiter: Arc<ExchangeRateLimiter>,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            recv_window,
            limiter,
        }
    }

    /// Signed GET; `query` is signed verbatim
    async fn signed_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<Envelope<T>, ExchangeError> {
        require_credentials(Exchange::Bybit, &self.api_key, &self.api_secret)?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response = send_with_retry(Exchange::Bybit, &self.limiter, READ_ATTEMPTS, || {
            let timestamp = timestamp_ms();
            let signature =
                bybit_signature(&self.api_secret, timestamp, &self.api_key, self.recv_window, query);
            self.client
                .request(Method::GET, &url)
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-SIGN-TYPE", "2")
        })
        .await?;

        decode(response).await
    }

    /// Signed POST; the serialized body is signed verbatim and never resent
    async fn signed_post<T: DeserializeOwned>(&self, path: &str, body: String) -> Result<Envelope<T>, ExchangeError> {
        require_credentials(Exchange::Bybit, &self.api_key, &self.api_secret)?;
        let url = format!("{}{}", self.base_url, path);

        let response = send_with_retry(Exchange::Bybit, &self.limiter, ORDER_ATTEMPTS, || {
            let timestamp = timestamp_ms();
            let signature =
                bybit_signature(&self.api_secret, timestamp, &self.api_key, self.recv_window, &body);
            self.client
                .request(Method::POST, &url)
                .header("Content-Type", "application/json")
                .header("X-BAPI-API-KEY", &self.api_key)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-SIGN-TYPE", "2")
                .body(body.clone())
        })
        .await?;

        decode(response).await
    }
}

/// Turn a response into an envelope, surfacing `retCode != 0` as an API error
///
/// Error responses often carry `"result":{}`, so the result is only decoded
/// into `T` once the return code is known to be zero.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    let raw: Envelope<serde_json::Value> = match serde_json::from_str(&body) {
        Ok(raw) => raw,
        Err(_) if !status.is_success() => {
            return Err(ExchangeError::Status {
                exchange: Exchange::Bybit,
                status: status.as_u16(),
                body,
            })
        }
        Err(e) => return Err(ExchangeError::Decode(format!("bybit: {}", e))),
    };

    if raw.ret_code != 0 {
        return Err(ExchangeError::Api {
            exchange: Exchange::Bybit,
            code: raw.ret_code,
            message: raw.ret_msg,
        });
    }

    let result = raw
        .result
        .filter(|value| !value.is_null())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ExchangeError::Decode(format!("bybit result: {}", e)))?;

    Ok(Envelope {
        ret_code: raw.ret_code,
        ret_msg: raw.ret_msg,
        result,
        time: raw.time,
    })
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn server_time_ms(&self) -> Result<i64, ExchangeError> {
        let url = format!("{}/v5/market/time", self.base_url);
        let response =
            send_with_retry(Exchange::Bybit, &self.limiter, READ_ATTEMPTS, || self.client.get(&url)).await?;
        let envelope: Envelope<ServerTime> = decode(response).await?;

        if let Some(time) = envelope.time {
            return Ok(time);
        }

        let seconds: i64 = envelope
            .result
            .ok_or_else(|| ExchangeError::Decode("bybit: missing server time".to_string()))?
            .time_second
            .parse()
            .map_err(|e| ExchangeError::Decode(format!("bybit: bad timeSecond: {}", e)))?;

        Ok(seconds * 1000)
    }

    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        let query = build_query(&[("accountType", "UNIFIED".to_string())]);
        let envelope: Envelope<WalletBalance> =
            self.signed_get("/v5/account/wallet-balance", &query).await?;

        let wallet = envelope
            .result
            .ok_or_else(|| ExchangeError::Decode("bybit: missing wallet result".to_string()))?;

        let usdt = wallet
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|coin| coin.coin.eq_ignore_ascii_case("USDT"));

        match usdt {
            Some(coin) => parse_decimal(&coin.wallet_balance),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<String, ExchangeError> {
        let side = match order.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };

        let body = serde_json::to_string(&CreateOrder {
            category: "linear",
            symbol: &order.symbol,
            side,
            order_type: "Market",
            qty: format_quantity(order.quantity),
            order_link_id: &order.client_order_id,
        })
        .map_err(|e| ExchangeError::Decode(e.to_string()))?;

        let envelope: Envelope<CreatedOrder> = self.signed_post("/v5/order/create", body).await?;

        let created = envelope
            .result
            .ok_or_else(|| ExchangeError::Decode("bybit: missing order result".to_string()))?;

        tracing::info!(
            "Bybit accepted {} {} {} as {}",
            side,
            format_quantity(order.quantity),
            order.symbol,
            created.order_id
        );

        Ok(created.order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::new_rate_limiter;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> BybitClient {
        BybitClient::new(&server.url(), "test_key", "test_secret", 5000, new_rate_limiter(600))
    }

    #[tokio::test]
    async fn test_server_time() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/time")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"timeSecond":"1700000000","timeNano":"1700000000123000000"},"retExtInfo":{},"time":1700000000123}"#)
            .create_async()
            .await;

        let time = client_for(&server).server_time_ms().await.unwrap();
        assert_eq!(time, 1_700_000_000_123);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wallet_balance_sends_signed_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::UrlEncoded("accountType".into(), "UNIFIED".into()))
            .match_header("X-BAPI-API-KEY", "test_key")
            .match_header("X-BAPI-RECV-WINDOW", "5000")
            .match_header("X-BAPI-SIGN-TYPE", "2")
            .match_header("X-BAPI-SIGN", Matcher::Regex("^[0-9a-f]{64}$".into()))
            .match_header("X-BAPI-TIMESTAMP", Matcher::Regex("^[0-9]{13}$".into()))
            .with_status(200)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"accountType":"UNIFIED","coin":[{"coin":"BTC","walletBalance":"0.5"},{"coin":"USDT","walletBalance":"1250.75","availableToWithdraw":""}]}]},"time":1700000000000}"#)
            .create_async()
            .await;

        let balance = client_for(&server).usdt_balance().await.unwrap();
        assert_eq!(balance, Decimal::new(125075, 2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ip_whitelist_error_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"retCode":10010,"retMsg":"Unmatched IP, please check your API key's bound IP addresses.","result":{},"time":1700000000000}"#)
            .create_async()
            .await;

        let err = client_for(&server).usdt_balance().await.unwrap_err();
        match &err {
            ExchangeError::Api { exchange, code, .. } => {
                assert_eq!(*exchange, Exchange::Bybit);
                assert_eq!(*code, 10010);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            err.validation_status(),
            crate::models::ValidationStatus::NeedsUpdate
        );
    }

    #[tokio::test]
    async fn test_unauthorized_without_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("401 Unauthorized")
            .create_async()
            .await;

        let err = client_for(&server).usdt_balance().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_place_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v5/order/create")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJsonString(
                r#"{"category":"linear","symbol":"BTCUSDT","side":"Buy","orderType":"Market","qty":"0.002","orderLinkId":"cbc123"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"orderId":"1321003749386327552","orderLinkId":"cbc123"},"time":1700000000000}"#)
            .create_async()
            .await;

        let order = OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            quantity: Decimal::new(2000, 6),
            client_order_id: "cbc123".to_string(),
        };

        let order_id = client_for(&server).place_market_order(&order).await.unwrap();
        assert_eq!(order_id, "1321003749386327552");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_order_is_not_resent_after_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v5/order/create")
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;

        let order = OrderRequest {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Sell,
            quantity: Decimal::new(1, 1),
            client_order_id: "cbc456".to_string(),
        };

        let err = client_for(&server).place_market_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 502, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reads_are_retried_after_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/market/time")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = client_for(&server).server_time_ms().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_secret_never_hits_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v5/account/wallet-balance")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client =
            BybitClient::new(&server.url(), "test_key", "", 5000, new_rate_limiter(600));
        let err = client.usdt_balance().await.unwrap_err();

        assert!(matches!(err, ExchangeError::MissingCredentials(Exchange::Bybit)));
        mock.assert_async().await;
    }
}
