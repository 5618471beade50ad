use rust_decimal::Decimal;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "config/coinbitclub";
const DEFAULT_JWT_SECRET: &str = "change-me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Full application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    pub trading: TradingSettings,
    pub exchange: ExchangeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// Comma-separated dashboard origins allowed to make credentialed requests
    pub cors_origins: String,
}

impl ServerSettings {
    pub fn cors_origin_list(&self) -> Vec<&str> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: Option<String>,
    pub dedup_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookSettings {
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingSettings {
    pub live: bool,
    pub queue_capacity: usize,
    pub sweep_interval_secs: u64,
    pub claim_timeout_secs: u64,
    pub max_position_size_pct: Decimal,
    pub min_order_notional: Decimal,
    pub max_daily_orders: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    pub bybit_base_url: String,
    pub bybit_testnet_url: String,
    pub binance_base_url: String,
    pub binance_testnet_url: String,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
}

impl AppConfig {
    /// Load configuration: defaults, optional file, then `CBC_*` environment
    ///
    /// Call `dotenvy::dotenv()` before this so `.env` values are visible.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("CBC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::build(Some(&file))
    }

    /// Defaults plus environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    fn build(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .set_default("server.bind_addr", "0.0.0.0:3000")?
            .set_default("server.cors_origins", "http://localhost:3000")?
            .set_default("database.url", "postgres://localhost/coinbitclub")?
            .set_default("database.max_connections", 5)?
            .set_default("database.run_migrations", true)?
            .set_default("redis.dedup_window_secs", 60)?
            .set_default("auth.jwt_secret", DEFAULT_JWT_SECRET)?
            .set_default("auth.token_ttl_hours", 24)?
            .set_default("auth.secure_cookies", false)?
            .set_default("trading.live", false)?
            .set_default("trading.queue_capacity", 256)?
            .set_default("trading.sweep_interval_secs", 30)?
            .set_default("trading.claim_timeout_secs", 300)?
            .set_default("trading.max_position_size_pct", "0.05")?
            .set_default("trading.min_order_notional", "5")?
            .set_default("trading.max_daily_orders", 20)?
            .set_default("exchange.bybit_base_url", "https://api.bybit.com")?
            .set_default("exchange.bybit_testnet_url", "https://api-testnet.bybit.com")?
            .set_default("exchange.binance_base_url", "https://api.binance.com")?
            .set_default("exchange.binance_testnet_url", "https://testnet.binance.vision")?
            .set_default("exchange.recv_window_ms", 5000)?
            .set_default("exchange.requests_per_minute", 120)?;

        if let Some(file) = file {
            builder = builder.add_source(::config::File::with_name(file).required(false));
        }

        builder = builder
            .add_source(
                ::config::Environment::with_prefix("CBC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())?;

        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("server.bind_addr", format!("0.0.0.0:{}", port))?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;

        if config.auth.jwt_secret == DEFAULT_JWT_SECRET {
            tracing::warn!("auth.jwt_secret is the built-in default; set JWT_SECRET in production");
        }

        Ok(config)
    }
}
