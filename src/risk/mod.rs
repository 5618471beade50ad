// Per-user order limits
pub mod limits;

pub use limits::{LimitTrip, OrderLimits, UserTradingState};
