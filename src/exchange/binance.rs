use super::signing::{binance_signature, build_query, timestamp_ms};
use super::transport::{send_with_retry, ORDER_ATTEMPTS, READ_ATTEMPTS};
use super::{format_quantity, parse_decimal, require_credentials, ExchangeClient, ExchangeError, ExchangeRateLimiter, OrderRequest};
use crate::models::{Exchange, OrderSide};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

/// Binance spot REST client for a single key
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
    limiter: Arc<ExchangeRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    #[serde(default)]
    can_trade: bool,
    #[serde(default)]
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderResponse {
    order_id: i64,
}

impl BinanceClient {
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

    /// Signed request: `recvWindow` and `timestamp` are appended, then the
    /// whole query string is signed. Only GETs are resent.
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        require_credentials(Exchange::Binance, &self.api_key, &self.api_secret)?;

        let attempts = if method == Method::GET {
            READ_ATTEMPTS
        } else {
            ORDER_ATTEMPTS
        };

        let response = send_with_retry(Exchange::Binance, &self.limiter, attempts, || {
            let mut all: Vec<(&str, String)> = params.to_vec();
            all.push(("recvWindow", self.recv_window.to_string()));
            all.push(("timestamp", timestamp_ms().to_string()));

            let query = build_query(&all);
            let signature = binance_signature(&self.api_secret, &query);
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

            self.client
                .request(method.clone(), url)
                .header("X-MBX-APIKEY", &self.api_key)
        })
        .await?;

        decode(response).await
    }
}

/// Binance reports failures as HTTP 4xx with `{code, msg}`
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => ExchangeError::Api {
                exchange: Exchange::Binance,
                code: error.code,
                message: error.msg,
            },
            Err(_) => ExchangeError::Status {
                exchange: Exchange::Binance,
                status: status.as_u16(),
                body,
            },
        });
    }

    serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("binance: {}", e)))
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn server_time_ms(&self) -> Result<i64, ExchangeError> {
        let url = format!("{}/api/v3/time", self.base_url);
        let response =
            send_with_retry(Exchange::Binance, &self.limiter, READ_ATTEMPTS, || self.client.get(&url)).await?;
        let time: ServerTime = decode(response).await?;
        Ok(time.server_time)
    }

    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        let account: Account = self.signed(Method::GET, "/api/v3/account", &[]).await?;

        if !account.can_trade {
            tracing::warn!("Binance key accepted but account cannot trade");
        }

        match account.balances.iter().find(|b| b.asset == "USDT") {
            Some(balance) => parse_decimal(&balance.free),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<String, ExchangeError> {
        let side = match order.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let params = [
            ("symbol", order.symbol.clone()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_quantity(order.quantity)),
            ("newClientOrderId", order.client_order_id.clone()),
        ];

        let created: NewOrderResponse = self.signed(Method::POST, "/api/v3/order", &params).await?;

        tracing::info!(
            "Binance accepted {} {} {} as {}",
            side,
            format_quantity(order.quantity),
            order.symbol,
            created.order_id
        );

        Ok(created.order_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::new_rate_limiter;
    use crate::models::ValidationStatus;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> BinanceClient {
        BinanceClient::new(&server.url(), "test_key", "test_secret", 5000, new_rate_limiter(600))
    }

    #[tokio::test]
    async fn test_server_time() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/time")
            .with_status(200)
            .with_body(r#"{"serverTime":1700000000456}"#)
            .create_async()
            .await;

        let time = client_for(&server).server_time_ms().await.unwrap();
        assert_eq!(time, 1_700_000_000_456);
    }

    #[tokio::test]
    async fn test_account_balance_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/account")
            .match_header("X-MBX-APIKEY", "test_key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("recvWindow".into(), "5000".into()),
                Matcher::Regex("timestamp=[0-9]{13}".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"canTrade":true,"balances":[{"asset":"BTC","free":"0.1","locked":"0"},{"asset":"USDT","free":"320.50000000","locked":"10.0"}]}"#)
            .create_async()
            .await;

        let balance = client_for(&server).usdt_balance().await.unwrap();
        assert_eq!(balance, Decimal::new(32050, 2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_key_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#)
            .create_async()
            .await;

        let err = client_for(&server).usdt_balance().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Api { code: -2015, .. }));
        assert_eq!(err.validation_status(), ValidationStatus::NeedsUpdate);
    }

    #[tokio::test]
    async fn test_missing_usdt_reads_as_zero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"canTrade":true,"balances":[]}"#)
            .create_async()
            .await;

        let balance = client_for(&server).usdt_balance().await.unwrap();
        assert_eq!(balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_place_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quantity".into(), "0.05".into()),
                Matcher::UrlEncoded("newClientOrderId".into(), "cbcabc".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"symbol":"ETHUSDT","orderId":28,"clientOrderId":"cbcabc","status":"FILLED"}"#)
            .create_async()
            .await;

        let order = OrderRequest {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Sell,
            quantity: Decimal::new(50, 3),
            client_order_id: "cbcabc".to_string(),
        };

        let order_id = client_for(&server).place_market_order(&order).await.unwrap();
        assert_eq!(order_id, "28");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_order_is_sent_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .expect(1)
            .create_async()
            .await;

        let order = OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            quantity: Decimal::new(1, 3),
            client_order_id: "cbcdef".to_string(),
        };

        let err = client_for(&server).place_market_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Status { status: 500, .. }));
        mock.assert_async().await;
    }
}
