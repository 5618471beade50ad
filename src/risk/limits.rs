use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TradingSettings;

/// Per-user guard rails applied before any order is planned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLimits {
    /// Fraction of available USDT committed per signal
    pub max_position_size_pct: Decimal,
    pub min_order_notional: Decimal,
    pub max_daily_orders: u32,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            max_position_size_pct: Decimal::new(5, 2), // 5% per order
            min_order_notional: Decimal::new(5, 0),    // 5 USDT exchange minimum
            max_daily_orders: 20,
        }
    }
}

impl From<&TradingSettings> for OrderLimits {
    fn from(settings: &TradingSettings) -> Self {
        Self {
            max_position_size_pct: settings.max_position_size_pct,
            min_order_notional: settings.min_order_notional,
            max_daily_orders: settings.max_daily_orders,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserTradingState {
    pub usdt_available: Decimal,
    /// Orders created today, skipped ones excluded
    pub orders_today: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitTrip {
    #[error("no USDT balance available")]
    NoBalance,
    #[error("order notional {notional} is below the minimum {minimum}")]
    BelowMinimumNotional { notional: Decimal, minimum: Decimal },
    #[error("daily order limit of {0} reached")]
    DailyOrderLimit(u32),
}

impl OrderLimits {
    /// Notional this user would commit on one signal
    pub fn position_notional(&self, state: &UserTradingState) -> Decimal {
        (state.usdt_available * self.max_position_size_pct).round_dp(8)
    }

    pub fn check(&self, state: &UserTradingState, notional: Decimal) -> Result<(), LimitTrip> {
        if state.usdt_available <= Decimal::ZERO {
            return Err(LimitTrip::NoBalance);
        }

        if notional < self.min_order_notional {
            return Err(LimitTrip::BelowMinimumNotional {
                notional,
                minimum: self.min_order_notional,
            });
        }

        if state.orders_today >= self.max_daily_orders {
            return Err(LimitTrip::DailyOrderLimit(self.max_daily_orders));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(usdt: i64, orders_today: u32) -> UserTradingState {
        UserTradingState {
            usdt_available: Decimal::new(usdt, 0),
            orders_today,
        }
    }

    #[test]
    fn test_position_notional() {
        let limits = OrderLimits::default();
        assert_eq!(limits.position_notional(&state(1000, 0)), Decimal::new(50, 0));
    }

    #[test]
    fn test_no_balance() {
        let limits = OrderLimits::default();
        assert_eq!(
            limits.check(&state(0, 0), Decimal::ZERO),
            Err(LimitTrip::NoBalance)
        );
    }

    #[test]
    fn test_daily_order_limit() {
        let limits = OrderLimits {
            max_daily_orders: 3,
            ..Default::default()
        };
        assert_eq!(
            limits.check(&state(1000, 3), Decimal::new(50, 0)),
            Err(LimitTrip::DailyOrderLimit(3))
        );
        assert!(limits.check(&state(1000, 2), Decimal::new(50, 0)).is_ok());
    }

    #[test]
    fn test_minimum_notional() {
        let limits = OrderLimits::default();
        let s = state(60, 0);
        let notional = limits.position_notional(&s);
        assert_eq!(notional, Decimal::new(3, 0));
        assert!(matches!(
            limits.check(&s, notional),
            Err(LimitTrip::BelowMinimumNotional { .. })
        ));
    }

    #[test]
    fn test_minimum_notional_reported_before_daily_limit() {
        let limits = OrderLimits::default();
        let s = state(60, 20);
        assert_eq!(
            limits.check(&s, Decimal::new(300, 2)),
            Err(LimitTrip::BelowMinimumNotional {
                notional: Decimal::new(300, 2),
                minimum: Decimal::new(5, 0),
            })
        );

        // Balance is still checked first
        assert_eq!(
            limits.check(&state(0, 20), Decimal::ZERO),
            Err(LimitTrip::NoBalance)
        );
    }

    #[test]
    fn test_trip_display() {
        assert_eq!(
            LimitTrip::DailyOrderLimit(20).to_string(),
            "daily order limit of 20 reached"
        );
    }
}
