use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{OrderSide, SignalAction};
use crate::risk::{OrderLimits, UserTradingState};
use crate::webhook::ParsedSignal;

/// Quantity precision sent to the exchanges
const QUANTITY_DP: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    Place {
        side: OrderSide,
        quantity: Decimal,
        notional: Decimal,
    },
    Skip,
}

#[derive(Debug, Clone)]
pub struct OrderDecision {
    pub action: OrderAction,
    pub reason: String,
}

impl OrderDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: OrderAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Turns one parsed signal into one decision per user
pub struct OrderPlanner {
    limits: OrderLimits,
}

impl OrderPlanner {
    pub fn new(limits: OrderLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &OrderLimits {
        &self.limits
    }

    pub fn plan(&self, signal: &ParsedSignal, state: &UserTradingState) -> OrderDecision {
        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Close => return OrderDecision::skip("close signals are recorded only"),
        };

        let price = match signal.price {
            Some(price) if price > Decimal::ZERO => price,
            _ => return OrderDecision::skip("signal has no price to size against"),
        };

        let notional = self.limits.position_notional(state);
        if let Err(trip) = self.limits.check(state, notional) {
            return OrderDecision::skip(format!("limit: {}", trip));
        }

        let quantity = (notional / price)
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
            .normalize();
        if quantity.is_zero() {
            return OrderDecision::skip(format!(
                "notional {} buys less than {} dp of {} at {}",
                notional, QUANTITY_DP, signal.symbol, price
            ));
        }

        OrderDecision {
            action: OrderAction::Place {
                side,
                quantity,
                notional,
            },
            reason: format!(
                "{} {} {} at {} ({} USDT)",
                side,
                quantity,
                signal.symbol,
                price,
                notional.normalize()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(action: SignalAction, price: Option<i64>) -> ParsedSignal {
        ParsedSignal {
            symbol: "BTCUSDT".to_string(),
            action,
            price: price.map(|p| Decimal::new(p, 0)),
            strategy: None,
            timeframe: None,
        }
    }

    fn state(usdt: i64) -> UserTradingState {
        UserTradingState {
            usdt_available: Decimal::new(usdt, 0),
            orders_today: 0,
        }
    }

    #[test]
    fn test_buy_is_sized_from_balance() {
        let planner = OrderPlanner::new(OrderLimits::default());
        let decision = planner.plan(&signal(SignalAction::Buy, Some(50_000)), &state(10_000));

        // 5% of 10000 = 500 USDT, 500 / 50000 = 0.01 BTC
        assert_eq!(
            decision.action,
            OrderAction::Place {
                side: OrderSide::Buy,
                quantity: Decimal::new(1, 2),
                notional: Decimal::new(500, 0),
            }
        );
        assert!(decision.reason.contains("BTCUSDT"));
    }

    #[test]
    fn test_quantity_rounds_down() {
        let planner = OrderPlanner::new(OrderLimits::default());
        // 500 / 30000 = 0.0166666.. -> 0.016666
        let decision = planner.plan(&signal(SignalAction::Sell, Some(30_000)), &state(10_000));

        match decision.action {
            OrderAction::Place { side, quantity, .. } => {
                assert_eq!(side, OrderSide::Sell);
                assert_eq!(quantity, Decimal::new(16_666, 6));
            }
            OrderAction::Skip => panic!("expected an order"),
        }
    }

    #[test]
    fn test_close_is_recorded_only() {
        let planner = OrderPlanner::new(OrderLimits::default());
        let decision = planner.plan(&signal(SignalAction::Close, Some(100)), &state(10_000));

        assert_eq!(decision.action, OrderAction::Skip);
        assert!(decision.reason.contains("close"));
    }

    #[test]
    fn test_missing_price_skips() {
        let planner = OrderPlanner::new(OrderLimits::default());
        let decision = planner.plan(&signal(SignalAction::Buy, None), &state(10_000));

        assert_eq!(decision.action, OrderAction::Skip);
        assert!(decision.reason.contains("no price"));
    }

    #[test]
    fn test_limit_trip_skips() {
        let planner = OrderPlanner::new(OrderLimits::default());

        let broke = planner.plan(&signal(SignalAction::Buy, Some(100)), &state(0));
        assert_eq!(broke.action, OrderAction::Skip);
        assert!(broke.reason.contains("no USDT balance"));

        // 5% of 50 = 2.5 USDT, under the 5 USDT minimum
        let small = planner.plan(&signal(SignalAction::Buy, Some(100)), &state(50));
        assert_eq!(small.action, OrderAction::Skip);
        assert!(small.reason.contains("below the minimum"));

        let busy = planner.plan(
            &signal(SignalAction::Buy, Some(100)),
            &UserTradingState {
                usdt_available: Decimal::new(10_000, 0),
                orders_today: 20,
            },
        );
        assert_eq!(busy.action, OrderAction::Skip);
        assert!(busy.reason.contains("daily order limit"));
    }

    #[test]
    fn test_dust_quantity_skips() {
        let planner = OrderPlanner::new(OrderLimits {
            min_order_notional: Decimal::ZERO,
            ..Default::default()
        });
        // 5 USDT cannot buy 0.000001 of something priced at 10M
        let decision = planner.plan(&signal(SignalAction::Buy, Some(10_000_000)), &state(100));

        assert_eq!(decision.action, OrderAction::Skip);
        assert!(decision.reason.contains("less than"));
    }
}
