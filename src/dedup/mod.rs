use crate::Result;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::{timeout, Duration};

const KEY_PREFIX: &str = "cbc:webhook:";

/// Redis guard against TradingView re-delivering the same alert
///
/// Each raw body fingerprint is claimed with `SET NX EX`, so only the first
/// delivery inside the window gets through.
#[derive(Clone)]
pub struct SignalDeduper {
    conn: ConnectionManager,
    window_secs: u64,
}

impl SignalDeduper {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `window_secs` - How long a fingerprint blocks repeats
    pub async fn connect(redis_url: &str, window_secs: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Webhook dedup enabled ({}s window)", window_secs);

        Ok(Self {
            conn,
            window_secs: window_secs.max(1),
        })
    }

    /// Returns true the first time a fingerprint is seen within the window
    pub async fn first_seen(&self, fingerprint: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{}{}", KEY_PREFIX, fingerprint))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.window_secs)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    /// Drop a fingerprint so the same body can be accepted again
    pub async fn forget(&self, fingerprint: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(format!("{}{}", KEY_PREFIX, fingerprint))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
