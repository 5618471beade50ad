use coinbitclub::api::{self, AppState};
use coinbitclub::auth::TokenIssuer;
use coinbitclub::db::PostgresPersistence;
use coinbitclub::dedup::SignalDeduper;
use coinbitclub::exchange::new_rate_limiter;
use coinbitclub::pipeline::{OrderPlanner, SignalProcessor, SignalQueue};
use coinbitclub::risk::OrderLimits;
use coinbitclub::{AppConfig, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::time::Duration;

const DEFAULT_LOG_FILTER: &str = "coinbitclub=info,tower_http=info,sqlx=warn";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 CoinBitClub backend starting");

    let config = Arc::new(AppConfig::load()?);

    let db = PostgresPersistence::new(
        &config.database.url,
        config.database.max_connections,
        config.database.run_migrations,
    )
    .await?;

    let dedup = connect_dedup(&config).await;
    let limiter = new_rate_limiter(config.exchange.requests_per_minute);
    let (queue, queue_rx) = SignalQueue::new(config.trading.queue_capacity);

    let limits = OrderLimits::from(&config.trading);

    tracing::info!("📊 Configuration:");
    tracing::info!(
        "  Trading mode: {}",
        if config.trading.live { "LIVE" } else { "paper" }
    );
    tracing::info!(
        "  Position size: {}% of USDT, min notional {} USDT, max {} orders/day",
        limits.max_position_size_pct * rust_decimal::Decimal::ONE_HUNDRED,
        limits.min_order_notional,
        limits.max_daily_orders
    );
    tracing::info!(
        "  Webhook secret: {}",
        if config.webhook.secret.is_some() { "required" } else { "not set" }
    );

    let processor = Arc::new(SignalProcessor::new(
        db.clone(),
        OrderPlanner::new(limits),
        config.exchange.clone(),
        limiter.clone(),
        config.trading.live,
        Duration::from_secs(config.trading.sweep_interval_secs.max(1)),
        Duration::from_secs(config.trading.claim_timeout_secs),
    ));
    let processor_task = tokio::spawn(processor.run(queue_rx));

    let state = AppState {
        db,
        tokens: Arc::new(TokenIssuer::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl_hours,
        )),
        queue,
        dedup,
        limiter,
        config: config.clone(),
        started_at: Instant::now(),
    };

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("🎯 API server listening on {}", config.server.bind_addr);

    // The router owns the last queue sender; once it is dropped the processor drains and stops
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match tokio::time::timeout(Duration::from_secs(10), processor_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Signal processor panicked: {}", e),
        Err(_) => tracing::warn!("Signal processor did not stop within 10s"),
    }

    tracing::info!("👋 CoinBitClub backend stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_dedup(config: &AppConfig) -> Option<SignalDeduper> {
    let url = config.redis.url.as_deref()?;

    match SignalDeduper::connect(url, config.redis.dedup_window_secs).await {
        Ok(dedup) => Some(dedup),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), continuing without webhook dedup",
                e
            );
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");
}
