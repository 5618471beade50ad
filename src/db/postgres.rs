use crate::models::{
    ApiKeyRecord, Balance, Exchange, OrderSide, OrderStatus, SignalStatus, TradingOrder, User,
    UserRole, ValidationStatus, WebhookSignal,
};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Postgres persistence for users, credentials, balances, signals and orders
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

/// Data for creating a platform user
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: UserRole,
    pub referred_by: Option<Uuid>,
}

/// Data for storing a webhook delivery
pub struct NewSignal<'a> {
    pub source: &'a str,
    pub raw_payload: &'a serde_json::Value,
    pub parsed_data: Option<&'a serde_json::Value>,
    pub status: SignalStatus,
    pub error: Option<&'a str>,
    pub fingerprint: Option<&'a str>,
}

/// Data for an order planned from a signal
pub struct NewOrder<'a> {
    pub signal_id: Uuid,
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub exchange: Exchange,
    pub symbol: &'a str,
    pub side: Option<OrderSide>,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub error: Option<&'a str>,
}

/// Counters for the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub users: i64,
    pub active_api_keys: i64,
    pub keys_needing_attention: i64,
    pub signals_24h: i64,
    pub rejected_signals_24h: i64,
    pub orders_24h: i64,
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, referred_by, is_active, created_at";

const API_KEY_COLUMNS: &str = "id, user_id, exchange, api_key, secret_key, testnet, is_active, \
     validation_status, validation_message, last_validated_at, created_at";

const SIGNAL_COLUMNS: &str = "id, source, raw_payload, parsed_data, status, error, fingerprint, \
     orders_created, received_at, processed_at";

const ORDER_COLUMNS: &str = "id, signal_id, user_id, api_key_id, exchange, symbol, side, quantity, \
     notional, price, status, exchange_order_id, error, created_at, updated_at";

impl PostgresPersistence {
    /// Connect to Postgres
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    /// * `max_connections` - Pool size
    /// * `run_migrations` - Apply `./migrations` on connect
    pub async fn new(database_url: &str, max_connections: u32, run_migrations: bool) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        tracing::info!("Connected to Postgres ({} max connections)", max_connections);

        Ok(Self { pool })
    }

    /// Wrap an existing pool (no migrations)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Cheap liveness probe
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== USERS ====================

    pub async fn create_user(&self, data: NewUser<'_>) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, referred_by)
            VALUES ($1, LOWER($2), $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(data.email.trim())
        .bind(data.name)
        .bind(data.password_hash)
        .bind(data.role.as_str())
        .bind(data.referred_by)
        .fetch_one(&self.pool)
        .await?;

        let user = user_from_row(&row)?;
        tracing::info!("Created {} user {}", user.role, user.email);

        Ok(user)
    }

    /// Lookup is case-insensitive on email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE email = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Number of users referred by an affiliate
    pub async fn count_referrals(&self, affiliate_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM users WHERE referred_by = $1")
            .bind(affiliate_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("total"))
    }

    // ==================== API KEYS ====================

    /// Insert or replace a user's credentials for an exchange
    /// Replacing credentials resets validation to `pending`
    pub async fn upsert_api_key(
        &self,
        user_id: Uuid,
        exchange: Exchange,
        api_key: &str,
        secret_key: &str,
        testnet: bool,
    ) -> Result<ApiKeyRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO user_api_keys (id, user_id, exchange, api_key, secret_key, testnet)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, exchange) DO UPDATE SET
                api_key = EXCLUDED.api_key,
                secret_key = EXCLUDED.secret_key,
                testnet = EXCLUDED.testnet,
                is_active = TRUE,
                validation_status = 'pending',
                validation_message = NULL,
                last_validated_at = NULL,
                updated_at = NOW()
            RETURNING {}
            "#,
            API_KEY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(exchange.as_str())
        .bind(api_key.trim())
        .bind(secret_key.trim())
        .bind(testnet)
        .fetch_one(&self.pool)
        .await?;

        let record = api_key_from_row(&row)?;
        tracing::info!(
            "Stored {} key {} for user {}",
            record.exchange,
            record.masked_key(),
            user_id
        );

        Ok(record)
    }

    pub async fn get_api_key(&self, id: Uuid) -> Result<Option<ApiKeyRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM user_api_keys WHERE id = $1",
            API_KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(api_key_from_row).transpose()
    }

    pub async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM user_api_keys WHERE user_id = $1 ORDER BY exchange ASC",
            API_KEY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(api_key_from_row).collect()
    }

    /// All keys, optionally filtered by validation status
    pub async fn list_api_keys_by_status(
        &self,
        status: Option<ValidationStatus>,
    ) -> Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM user_api_keys
            WHERE ($1::TEXT IS NULL OR validation_status = $1)
            ORDER BY created_at ASC
            "#,
            API_KEY_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(api_key_from_row).collect()
    }

    pub async fn set_validation_status(
        &self,
        id: Uuid,
        status: ValidationStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_api_keys
            SET validation_status = $2,
                validation_message = $3,
                last_validated_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("API key {} not found", id).into());
        }

        tracing::debug!("API key {} marked {}", id, status);

        Ok(())
    }

    /// One active, valid key per active user (most recently validated wins)
    pub async fn tradable_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (k.user_id)
                   k.id, k.user_id, k.exchange, k.api_key, k.secret_key, k.testnet, k.is_active,
                   k.validation_status, k.validation_message, k.last_validated_at, k.created_at
            FROM user_api_keys k
            JOIN users u ON u.id = k.user_id
            WHERE k.is_active AND u.is_active AND k.validation_status = 'valid'
            ORDER BY k.user_id, k.last_validated_at DESC NULLS LAST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(api_key_from_row).collect()
    }

    // ==================== BALANCES ====================

    pub async fn get_balances(&self, user_id: Uuid) -> Result<Vec<Balance>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, asset, available, locked, updated_at
            FROM user_balances
            WHERE user_id = $1
            ORDER BY asset ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(balance_from_row).collect())
    }

    /// Available amount of an asset; missing rows read as zero
    pub async fn get_balance(&self, user_id: Uuid, asset: &str) -> Result<Decimal> {
        let row = sqlx::query(
            "SELECT available FROM user_balances WHERE user_id = $1 AND asset = UPPER($2)",
        )
        .bind(user_id)
        .bind(asset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("available")).unwrap_or(Decimal::ZERO))
    }

    pub async fn set_balance(&self, user_id: Uuid, asset: &str, available: Decimal) -> Result<Balance> {
        if available < Decimal::ZERO {
            return Err(format!("Balance cannot be negative ({})", available).into());
        }

        let row = sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, asset, available)
            VALUES ($1, UPPER($2), $3)
            ON CONFLICT (user_id, asset) DO UPDATE SET
                available = EXCLUDED.available,
                updated_at = NOW()
            RETURNING user_id, asset, available, locked, updated_at
            "#,
        )
        .bind(user_id)
        .bind(asset)
        .bind(available)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Set {} balance for {} to {}", asset, user_id, available);

        Ok(balance_from_row(&row))
    }

    /// Add `delta` (may be negative) to an asset balance atomically
    ///
    /// The row is created at zero first so `FOR UPDATE` always has something
    /// to lock, which serializes concurrent adjustments of a new asset.
    pub async fn adjust_balance(&self, user_id: Uuid, asset: &str, delta: Decimal) -> Result<Balance> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, asset, available)
            VALUES ($1, UPPER($2), 0)
            ON CONFLICT (user_id, asset) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(asset)
        .execute(&mut *tx)
        .await?;

        let current: Decimal = sqlx::query(
            "SELECT available FROM user_balances WHERE user_id = $1 AND asset = UPPER($2) FOR UPDATE",
        )
        .bind(user_id)
        .bind(asset)
        .fetch_one(&mut *tx)
        .await?
        .get("available");

        let updated = current + delta;
        if updated < Decimal::ZERO {
            return Err(format!(
                "Insufficient {} balance: {} + {} would be negative",
                asset, current, delta
            )
            .into());
        }

        let row = sqlx::query(
            r#"
            UPDATE user_balances
            SET available = $3, updated_at = NOW()
            WHERE user_id = $1 AND asset = UPPER($2)
            RETURNING user_id, asset, available, locked, updated_at
            "#,
        )
        .bind(user_id)
        .bind(asset)
        .bind(updated)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Adjusted {} balance for {} by {} -> {}", asset, user_id, delta, updated);

        Ok(balance_from_row(&row))
    }

    // ==================== SIGNALS ====================

    pub async fn insert_signal(&self, data: NewSignal<'_>) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO webhook_signals (id, source, raw_payload, parsed_data, status, error, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(data.source)
        .bind(data.raw_payload)
        .bind(data.parsed_data)
        .bind(data.status.as_str())
        .bind(data.error)
        .bind(data.fingerprint)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Stored {} signal {} from {}", data.status, id, data.source);

        Ok(id)
    }

    pub async fn get_signal(&self, id: Uuid) -> Result<Option<WebhookSignal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_signals WHERE id = $1",
            SIGNAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    pub async fn list_recent_signals(&self, limit: i64) -> Result<Vec<WebhookSignal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM webhook_signals ORDER BY received_at DESC LIMIT $1",
            SIGNAL_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    /// Atomically move a signal from `parsed` to `processing`
    ///
    /// Returns false when another worker already claimed it.
    pub async fn claim_signal(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_signals
            SET status = 'processing', claimed_at = NOW()
            WHERE id = $1 AND status = 'parsed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_signal_status(
        &self,
        id: Uuid,
        status: SignalStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_signals
            SET status = $2,
                error = $3,
                processed_at = CASE WHEN $2 IN ('processed', 'failed', 'rejected') THEN NOW() ELSE processed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn finish_signal(&self, id: Uuid, orders_created: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_signals
            SET status = 'processed', orders_created = $2, error = NULL, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(orders_created)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Put `processing` rows claimed longer than `older_than` ago back to
    /// `parsed`, so a worker that died mid-signal does not strand it
    ///
    /// Orders already written for those signals are kept; the
    /// `(signal_id, user_id)` uniqueness stops them being placed twice.
    pub async fn release_stale_claims(&self, older_than: std::time::Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_signals
            SET status = 'parsed', claimed_at = NULL
            WHERE status = 'processing'
              AND (claimed_at IS NULL OR claimed_at <= NOW() - make_interval(secs => $1))
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::warn!("Released {} stale signal claim(s)", released);
        }

        Ok(released)
    }

    /// Parsed signals not yet picked up, oldest first
    pub async fn pending_signal_ids(&self, limit: i64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM webhook_signals
            WHERE status = 'parsed'
            ORDER BY received_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Rows that were stored without `parsed_data` (pre-fix deliveries)
    pub async fn signals_missing_parsed_data(&self, limit: i64) -> Result<Vec<WebhookSignal>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM webhook_signals
            WHERE parsed_data IS NULL AND status IN ('received', 'failed')
            ORDER BY received_at ASC
            LIMIT $1
            "#,
            SIGNAL_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    /// Attach parsed data and make the signal eligible for processing
    pub async fn set_parsed_data(&self, id: Uuid, parsed: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_signals SET parsed_data = $2, status = 'parsed', error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(parsed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete rejected (and optionally never-parsed) signals received before `older_than`
    pub async fn purge_signals(&self, older_than: DateTime<Utc>, include_unparsed: bool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_signals
            WHERE received_at < $1
              AND (status = 'rejected' OR ($2 AND parsed_data IS NULL AND status IN ('received', 'failed')))
            "#,
        )
        .bind(older_than)
        .bind(include_unparsed)
        .execute(&self.pool)
        .await?;

        tracing::info!("Purged {} signals received before {}", result.rows_affected(), older_than);

        Ok(result.rows_affected())
    }

    /// Rows `purge_signals` would delete
    pub async fn count_purgeable_signals(
        &self,
        older_than: DateTime<Utc>,
        include_unparsed: bool,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM webhook_signals
            WHERE received_at < $1
              AND (status = 'rejected' OR ($2 AND parsed_data IS NULL AND status IN ('received', 'failed')))
            "#,
        )
        .bind(older_than)
        .bind(include_unparsed)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    // ==================== ORDERS ====================

    /// Insert an order; returns None when the (signal, user) pair already has one
    pub async fn insert_order(&self, data: NewOrder<'_>) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            INSERT INTO trading_orders (
                id, signal_id, user_id, api_key_id, exchange, symbol, side,
                quantity, notional, price, status, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (signal_id, user_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.signal_id)
        .bind(data.user_id)
        .bind(data.api_key_id)
        .bind(data.exchange.as_str())
        .bind(data.symbol)
        .bind(data.side.map(|s| s.as_str()))
        .bind(data.quantity)
        .bind(data.notional)
        .bind(data.price)
        .bind(data.status.as_str())
        .bind(data.error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    pub async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        exchange_order_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trading_orders
            SET status = $2, exchange_order_id = $3, error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(exchange_order_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn orders_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<TradingOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trading_orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    pub async fn orders_for_signal(&self, signal_id: Uuid) -> Result<Vec<TradingOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trading_orders WHERE signal_id = $1 ORDER BY created_at ASC",
            ORDER_COLUMNS
        ))
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    /// Orders counted against the daily limit (skipped ones excluded)
    pub async fn count_orders_today(&self, user_id: Uuid) -> Result<u32> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM trading_orders
            WHERE user_id = $1
              AND status <> 'skipped'
              AND created_at >= date_trunc('day', NOW())
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }

    // ==================== STATS ====================

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM user_api_keys WHERE is_active) AS active_api_keys,
                (SELECT COUNT(*) FROM user_api_keys
                    WHERE is_active AND validation_status IN ('needs_update', 'invalid')) AS keys_needing_attention,
                (SELECT COUNT(*) FROM webhook_signals
                    WHERE received_at >= NOW() - INTERVAL '24 hours') AS signals_24h,
                (SELECT COUNT(*) FROM webhook_signals
                    WHERE status = 'rejected' AND received_at >= NOW() - INTERVAL '24 hours') AS rejected_signals_24h,
                (SELECT COUNT(*) FROM trading_orders
                    WHERE created_at >= NOW() - INTERVAL '24 hours') AS orders_24h
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardStats {
            users: row.get("users"),
            active_api_keys: row.get("active_api_keys"),
            keys_needing_attention: row.get("keys_needing_attention"),
            signals_24h: row.get("signals_24h"),
            rejected_signals_24h: row.get("rejected_signals_24h"),
            orders_24h: row.get("orders_24h"),
        })
    }

    /// Delete a user and everything hanging off it (testing only)
    #[cfg(test)]
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete one signal and its orders (testing only)
    #[cfg(test)]
    pub async fn delete_signal(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM webhook_signals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.get("role");

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        role: role.parse()?,
        referred_by: row.get("referred_by"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

fn api_key_from_row(row: &PgRow) -> Result<ApiKeyRecord> {
    let exchange: String = row.get("exchange");
    let status: String = row.get("validation_status");

    Ok(ApiKeyRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        exchange: exchange.parse()?,
        api_key: row.get("api_key"),
        secret_key: row.get("secret_key"),
        testnet: row.get("testnet"),
        is_active: row.get("is_active"),
        validation_status: status.parse()?,
        validation_message: row.get("validation_message"),
        last_validated_at: row.get("last_validated_at"),
        created_at: row.get("created_at"),
    })
}

fn balance_from_row(row: &PgRow) -> Balance {
    Balance {
        user_id: row.get("user_id"),
        asset: row.get("asset"),
        available: row.get("available"),
        locked: row.get("locked"),
        updated_at: row.get("updated_at"),
    }
}

fn signal_from_row(row: &PgRow) -> Result<WebhookSignal> {
    let status: String = row.get("status");

    Ok(WebhookSignal {
        id: row.get("id"),
        source: row.get("source"),
        raw_payload: row.get("raw_payload"),
        parsed_data: row.get("parsed_data"),
        status: status.parse()?,
        error: row.get("error"),
        fingerprint: row.get("fingerprint"),
        orders_created: row.get("orders_created"),
        received_at: row.get("received_at"),
        processed_at: row.get("processed_at"),
    })
}

fn order_from_row(row: &PgRow) -> Result<TradingOrder> {
    let exchange: String = row.get("exchange");
    let side: Option<String> = row.get("side");
    let status: String = row.get("status");

    Ok(TradingOrder {
        id: row.get("id"),
        signal_id: row.get("signal_id"),
        user_id: row.get("user_id"),
        api_key_id: row.get("api_key_id"),
        exchange: exchange.parse()?,
        symbol: row.get("symbol"),
        side: side.as_deref().map(str::parse).transpose()?,
        quantity: row.get("quantity"),
        notional: row.get("notional"),
        price: row.get("price"),
        status: status.parse()?,
        exchange_order_id: row.get("exchange_order_id"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;
    use serde_json::json;

    async fn get_test_db() -> PostgresPersistence {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/coinbitclub_test".to_string());

        PostgresPersistence::new(&database_url, 2, true)
            .await
            .expect("Failed to connect to test database")
    }

    async fn create_test_user(db: &PostgresPersistence, role: UserRole) -> User {
        let email = format!("test-{}@coinbitclub.test", Uuid::new_v4());
        db.create_user(NewUser {
            email: &email,
            name: "Test User",
            password_hash: "$2b$04$notarealhash",
            role,
            referred_by: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_create_and_lookup_user() {
        let db = get_test_db().await;
        let user = create_test_user(&db, UserRole::Affiliate).await;

        let found = db
            .get_user_by_email(&user.email.to_uppercase())
            .await
            .unwrap()
            .expect("user should exist");
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, UserRole::Affiliate);
        assert!(found.is_active);

        db.delete_user(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_referral_count() {
        let db = get_test_db().await;
        let affiliate = create_test_user(&db, UserRole::Affiliate).await;

        let email = format!("ref-{}@coinbitclub.test", Uuid::new_v4());
        let referred = db
            .create_user(NewUser {
                email: &email,
                name: "Referred",
                password_hash: "x",
                role: UserRole::User,
                referred_by: Some(affiliate.id),
            })
            .await
            .unwrap();

        assert_eq!(db.count_referrals(affiliate.id).await.unwrap(), 1);

        db.delete_user(referred.id).await.unwrap();
        db.delete_user(affiliate.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_upsert_api_key_resets_status() {
        let db = get_test_db().await;
        let user = create_test_user(&db, UserRole::User).await;

        let key = db
            .upsert_api_key(user.id, Exchange::Bybit, "KEY_ONE_123456", "SECRET_ONE", false)
            .await
            .unwrap();
        assert_eq!(key.validation_status, ValidationStatus::Pending);

        db.set_validation_status(key.id, ValidationStatus::Valid, Some("ok"))
            .await
            .unwrap();
        let tradable = db.tradable_api_keys().await.unwrap();
        assert!(tradable.iter().any(|k| k.id == key.id));

        let replaced = db
            .upsert_api_key(user.id, Exchange::Bybit, "KEY_TWO_123456", "SECRET_TWO", true)
            .await
            .unwrap();
        assert_eq!(replaced.id, key.id);
        assert_eq!(replaced.validation_status, ValidationStatus::Pending);
        assert!(replaced.testnet);
        assert_eq!(replaced.secret_key, "SECRET_TWO");

        let tradable = db.tradable_api_keys().await.unwrap();
        assert!(!tradable.iter().any(|k| k.id == key.id));

        db.delete_user(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_concurrent_adjustments_on_new_asset() {
        let db = PostgresPersistence::new(
            &std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/coinbitclub_test".to_string()),
            8,
            true,
        )
        .await
        .expect("Failed to connect to test database");
        let user = create_test_user(&db, UserRole::User).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.adjust_balance(user.id, "BNB", Decimal::from(10)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(db.get_balance(user.id, "BNB").await.unwrap(), Decimal::from(80));

        // A failed debit on an untouched asset leaves no row behind
        assert!(db.adjust_balance(user.id, "SOL", Decimal::from(-1)).await.is_err());
        assert!(!db
            .get_balances(user.id)
            .await
            .unwrap()
            .iter()
            .any(|b| b.asset == "SOL"));

        db.delete_user(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_balance_adjustments() {
        let db = get_test_db().await;
        let user = create_test_user(&db, UserRole::User).await;

        assert_eq!(db.get_balance(user.id, "USDT").await.unwrap(), Decimal::ZERO);

        db.set_balance(user.id, "usdt", Decimal::from(100)).await.unwrap();
        let balance = db.adjust_balance(user.id, "USDT", Decimal::from(-40)).await.unwrap();
        assert_eq!(balance.asset, "USDT");
        assert_eq!(balance.available, Decimal::from(60));

        let overdraw = db.adjust_balance(user.id, "USDT", Decimal::from(-61)).await;
        assert!(overdraw.is_err());
        assert_eq!(db.get_balance(user.id, "USDT").await.unwrap(), Decimal::from(60));

        assert!(db.set_balance(user.id, "USDT", Decimal::from(-1)).await.is_err());

        db.delete_user(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_signal_claim_and_order_idempotency() {
        let db = get_test_db().await;
        let user = create_test_user(&db, UserRole::User).await;
        let key = db
            .upsert_api_key(user.id, Exchange::Binance, "BINANCE_KEY_123", "SECRET", false)
            .await
            .unwrap();

        let raw = json!({"symbol": "BTCUSDT", "action": "buy", "price": 100});
        let parsed = json!({"symbol": "BTCUSDT", "action": SignalAction::Buy, "price": "100"});
        let signal_id = db
            .insert_signal(NewSignal {
                source: "signal",
                raw_payload: &raw,
                parsed_data: Some(&parsed),
                status: SignalStatus::Parsed,
                error: None,
                fingerprint: None,
            })
            .await
            .unwrap();

        assert!(db.pending_signal_ids(1000).await.unwrap().contains(&signal_id));
        assert!(db.claim_signal(signal_id).await.unwrap());
        assert!(!db.claim_signal(signal_id).await.unwrap());

        let new_order = || NewOrder {
            signal_id,
            user_id: user.id,
            api_key_id: key.id,
            exchange: Exchange::Binance,
            symbol: "BTCUSDT",
            side: Some(OrderSide::Buy),
            quantity: Decimal::new(5, 2),
            notional: Decimal::from(5),
            price: Some(Decimal::from(100)),
            status: OrderStatus::Pending,
            error: None,
        };

        let first = db.insert_order(new_order()).await.unwrap();
        let second = db.insert_order(new_order()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        db.update_order_status(first.unwrap(), OrderStatus::Simulated, None, None)
            .await
            .unwrap();
        db.finish_signal(signal_id, 1).await.unwrap();

        let orders = db.orders_for_signal(signal_id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Simulated);
        assert_eq!(db.count_orders_today(user.id).await.unwrap(), 1);

        let signal = db.get_signal(signal_id).await.unwrap().unwrap();
        assert_eq!(signal.status, SignalStatus::Processed);
        assert_eq!(signal.orders_created, 1);

        db.delete_signal(signal_id).await.unwrap();
        db.delete_user(user.id).await.unwrap();
    }
}
