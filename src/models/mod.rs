use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error for text columns that hold an unexpected value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Implements `as_str`, `Display` and `FromStr` for text-backed enums.
/// Parsing is case-insensitive.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(UnknownVariant::new($kind, s)),
                }
            }
        }
    };
}

/// Platform roles, carried in the `role` claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
    Affiliate,
}

text_enum!(UserRole, "role", {
    Admin => "admin",
    User => "user",
    Affiliate => "affiliate",
});

impl UserRole {
    /// Landing page after login
    pub fn home_path(&self) -> &'static str {
        match self {
            UserRole::Admin => "/admin/dashboard",
            UserRole::User => "/user/dashboard",
            UserRole::Affiliate => "/affiliate/dashboard",
        }
    }
}

/// Platform account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: UserRole,
    pub referred_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Bybit,
    Binance,
}

text_enum!(Exchange, "exchange", {
    Bybit => "bybit",
    Binance => "binance",
});

/// Outcome of the last key check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Pending,
    NeedsUpdate,
    Invalid,
}

text_enum!(ValidationStatus, "validation status", {
    Valid => "valid",
    Pending => "pending",
    NeedsUpdate => "needs_update",
    Invalid => "invalid",
});

/// Exchange credentials stored per user
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub exchange: Exchange,
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub testnet: bool,
    pub is_active: bool,
    pub validation_status: ValidationStatus,
    pub validation_message: Option<String>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    pub fn masked_key(&self) -> String {
        mask_key(&self.api_key)
    }
}

/// Keep the first and last 4 characters of a credential
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

fn serialize_masked<S: serde::Serializer>(key: &str, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&mask_key(key))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub asset: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Direction carried by a webhook signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

text_enum!(SignalAction, "signal action", {
    Buy => "buy",
    Sell => "sell",
    Close => "close",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Received,
    Parsed,
    Rejected,
    Processing,
    Processed,
    Failed,
}

text_enum!(SignalStatus, "signal status", {
    Received => "received",
    Parsed => "parsed",
    Rejected => "rejected",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
});

/// A stored webhook delivery
#[derive(Debug, Clone, Serialize)]
pub struct WebhookSignal {
    pub id: Uuid,
    pub source: String,
    pub raw_payload: serde_json::Value,
    pub parsed_data: Option<serde_json::Value>,
    pub status: SignalStatus,
    pub error: Option<String>,
    pub fingerprint: Option<String>,
    pub orders_created: i32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide, "order side", {
    Buy => "buy",
    Sell => "sell",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Simulated,
    Skipped,
    Failed,
}

text_enum!(OrderStatus, "order status", {
    Pending => "pending",
    Submitted => "submitted",
    Simulated => "simulated",
    Skipped => "skipped",
    Failed => "failed",
});

/// Order derived from a signal for one user
#[derive(Debug, Clone, Serialize)]
pub struct TradingOrder {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub user_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub exchange: Exchange,
    pub symbol: String,
    pub side: Option<OrderSide>,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
