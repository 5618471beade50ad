use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::planner::{OrderAction, OrderPlanner};
use crate::config::ExchangeSettings;
use crate::db::{NewOrder, PostgresPersistence};
use crate::exchange::{client_for_key, client_order_id, ExchangeRateLimiter, OrderRequest};
use crate::models::{ApiKeyRecord, OrderSide, OrderStatus, SignalStatus};
use crate::risk::UserTradingState;
use crate::webhook::ParsedSignal;
use crate::Result;

/// Signals picked up per sweep
const SWEEP_BATCH: i64 = 100;

/// Turns parsed webhook signals into per-user orders
pub struct SignalProcessor {
    db: PostgresPersistence,
    planner: OrderPlanner,
    exchange: ExchangeSettings,
    limiter: Arc<ExchangeRateLimiter>,
    live: bool,
    sweep_interval: Duration,
    /// How long a `processing` claim may sit before the sweep releases it
    claim_timeout: Duration,
}

impl SignalProcessor {
    pub fn new(
        db: PostgresPersistence,
        planner: OrderPlanner,
        exchange: ExchangeSettings,
        limiter: Arc<ExchangeRateLimiter>,
        live: bool,
        sweep_interval: Duration,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            db,
            planner,
            exchange,
            limiter,
            live,
            sweep_interval,
            claim_timeout,
        }
    }

    /// Process one signal
    ///
    /// Returns `None` when another worker already claimed it, otherwise the
    /// number of orders sent (or simulated) for it.
    pub async fn process(&self, signal_id: Uuid) -> Result<Option<i32>> {
        if !self.db.claim_signal(signal_id).await? {
            tracing::debug!("Signal {} already claimed, skipping", signal_id);
            return Ok(None);
        }

        match self.process_claimed(signal_id).await {
            Ok(orders_created) => {
                self.db.finish_signal(signal_id, orders_created).await?;
                tracing::info!(
                    "Signal {} processed: {} order(s) created",
                    signal_id,
                    orders_created
                );
                Ok(Some(orders_created))
            }
            Err(e) => {
                tracing::error!("Signal {} failed: {}", signal_id, e);
                self.db
                    .mark_signal_status(signal_id, SignalStatus::Failed, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn process_claimed(&self, signal_id: Uuid) -> Result<i32> {
        let signal = self
            .db
            .get_signal(signal_id)
            .await?
            .ok_or_else(|| format!("signal {} disappeared", signal_id))?;

        let parsed: ParsedSignal = match signal.parsed_data {
            Some(data) => serde_json::from_value(data)?,
            None => return Err("signal has no parsed_data".into()),
        };

        let keys = self.db.tradable_api_keys().await?;
        if keys.is_empty() {
            tracing::info!("Signal {}: no users with a valid API key", signal_id);
        }

        let mut orders_created = 0;

        for key in &keys {
            let state = UserTradingState {
                usdt_available: self.db.get_balance(key.user_id, "USDT").await?,
                orders_today: self.db.count_orders_today(key.user_id).await?,
            };

            let decision = self.planner.plan(&parsed, &state);
            tracing::info!(
                "Signal {} user {}: {:?} ({})",
                signal_id,
                key.user_id,
                decision.action,
                decision.reason
            );

            let (side, quantity, notional, status, note) = match &decision.action {
                OrderAction::Place {
                    side,
                    quantity,
                    notional,
                } => (Some(*side), *quantity, *notional, OrderStatus::Pending, None),
                OrderAction::Skip => (
                    side_hint(&parsed),
                    Decimal::ZERO,
                    Decimal::ZERO,
                    OrderStatus::Skipped,
                    Some(decision.reason.as_str()),
                ),
            };

            let inserted = self
                .db
                .insert_order(NewOrder {
                    signal_id,
                    user_id: key.user_id,
                    api_key_id: key.id,
                    exchange: key.exchange,
                    symbol: &parsed.symbol,
                    side,
                    quantity,
                    notional,
                    price: parsed.price,
                    status,
                    error: note,
                })
                .await?;

            let Some(order_id) = inserted else {
                tracing::debug!(
                    "Signal {} already has an order for user {}",
                    signal_id,
                    key.user_id
                );
                continue;
            };

            if let OrderAction::Place { side, quantity, .. } = decision.action {
                self.execute(order_id, key, &parsed.symbol, side, quantity).await?;
                orders_created += 1;
            }
        }

        Ok(orders_created)
    }

    /// Send (live) or simulate (paper) one pending order
    ///
    /// Exchange failures land on the order row; only database errors bubble up.
    async fn execute(
        &self,
        order_id: Uuid,
        key: &ApiKeyRecord,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<()> {
        if !self.live {
            return self
                .db
                .update_order_status(order_id, OrderStatus::Simulated, None, None)
                .await;
        }

        let client = client_for_key(key, &self.exchange, self.limiter.clone());
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            quantity,
            client_order_id: client_order_id(order_id),
        };

        match client.place_market_order(&request).await {
            Ok(exchange_order_id) => {
                self.db
                    .update_order_status(
                        order_id,
                        OrderStatus::Submitted,
                        Some(&exchange_order_id),
                        None,
                    )
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    "Order {} on {} for key {} failed: {}",
                    order_id,
                    key.exchange,
                    key.masked_key(),
                    e
                );
                self.db
                    .update_order_status(order_id, OrderStatus::Failed, None, Some(&e.to_string()))
                    .await
            }
        }
    }

    /// Drain parsed signals that never made it through the queue, after
    /// releasing claims left behind by a crash or shutdown
    pub async fn sweep(&self) -> usize {
        if let Err(e) = self.db.release_stale_claims(self.claim_timeout).await {
            tracing::warn!("Sweep could not release stale claims: {}", e);
        }

        let ids = match self.db.pending_signal_ids(SWEEP_BATCH).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Sweep could not list pending signals: {}", e);
                return 0;
            }
        };

        if !ids.is_empty() {
            tracing::info!("Sweep found {} pending signal(s)", ids.len());
        }

        let mut processed = 0;
        for id in ids {
            match self.process(id).await {
                Ok(Some(_)) => processed += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!("Sweep failed on signal {}: {}", id, e),
            }
        }
        processed
    }

    /// Worker loop: queued ids plus a periodic sweep, until the queue closes
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Uuid>) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Signal processor started ({} mode, sweep every {:?})",
            if self.live { "live" } else { "paper" },
            self.sweep_interval
        );

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(id) => {
                        if let Err(e) = self.process(id).await {
                            tracing::warn!("Processing {} failed: {}", id, e);
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("Signal queue closed, processor stopped");
    }
}

/// Side recorded on skipped rows, for the dashboards
fn side_hint(signal: &ParsedSignal) -> Option<OrderSide> {
    match signal.action {
        crate::models::SignalAction::Buy => Some(OrderSide::Buy),
        crate::models::SignalAction::Sell => Some(OrderSide::Sell),
        crate::models::SignalAction::Close => None,
    }
}
