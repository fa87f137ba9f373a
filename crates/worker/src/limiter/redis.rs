//! Redis-backed tenant limiter (feature `redis`)
//!
//! One sorted set per tenant at `tenant:concurrency:{tenant_id}`, scored by
//! acquisition time in milliseconds. Every mutation is a single round trip.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::Client;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{LimiterConfig, LimiterError, TenantLimiter};

const KEY_PREFIX: &str = "tenant:concurrency";

/// Connection timeout when opening the store
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tenant limiter shared by every worker process pointing at the same Redis
pub struct RedisTenantLimiter {
    config: LimiterConfig,
    client: Client,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisTenantLimiter {
    /// Build the limiter without connecting.
    ///
    /// The connection is opened by the first operation and retried by every
    /// later one until it succeeds, so a Redis outage at startup shows up as
    /// limiter errors (and a failing `ping`) rather than a startup failure.
    pub fn new(redis_url: &str, config: LimiterConfig) -> Result<Self, LimiterError> {
        let client = Client::open(redis_url).map_err(|e| LimiterError::Connection(e.to_string()))?;
        Ok(Self {
            config,
            client,
            conn: OnceCell::new(),
        })
    }

    /// Build the limiter and open the connection now
    pub async fn connect(redis_url: &str, config: LimiterConfig) -> Result<Self, LimiterError> {
        let limiter = Self::new(redis_url, config)?;
        limiter.connection().await?;
        Ok(limiter)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, LimiterError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    self.client.get_multiplexed_async_connection(),
                )
                .await
                .map_err(|_| LimiterError::Connection("redis connection timeout".to_string()))?
                .map_err(|e| LimiterError::Connection(e.to_string()))?;
                info!(max_per_tenant = self.config.max_per_tenant, "Redis tenant limiter connected");
                Ok::<_, LimiterError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    fn key(tenant_id: &str) -> String {
        format!("{}:{}", KEY_PREFIX, tenant_id)
    }

    /// Exclusive upper bound for stale scores, in ZRANGEBYSCORE syntax
    fn stale_bound(&self, now_ms: i64) -> String {
        let stale_ms = i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX);
        format!("({}", now_ms.saturating_sub(stale_ms))
    }

    fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.config.key_ttl.as_secs()).unwrap_or(i64::MAX).max(1)
    }
}

fn store_err(e: ::redis::RedisError) -> LimiterError {
    LimiterError::Store(e.to_string())
}

#[async_trait]
impl TenantLimiter for RedisTenantLimiter {
    async fn acquire(&self, tenant_id: &str, execution_id: &str) -> Result<bool, LimiterError> {
        let key = Self::key(tenant_id);
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.connection().await?;

        let (count, held): (usize, Option<f64>) = ::redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(self.stale_bound(now_ms))
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .cmd("ZSCORE")
            .arg(&key)
            .arg(execution_id)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        if held.is_none() && count >= self.config.max_per_tenant {
            debug!(tenant_id, count, max = self.config.max_per_tenant, "Tenant at capacity");
            return Ok(false);
        }

        let _: () = ::redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(now_ms)
            .arg(execution_id)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(true)
    }

    async fn release(&self, tenant_id: &str, execution_id: &str) -> Result<(), LimiterError> {
        let mut conn = self.connection().await?;
        let _: i64 = ::redis::cmd("ZREM")
            .arg(Self::key(tenant_id))
            .arg(execution_id)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn current_count(&self, tenant_id: &str) -> Result<usize, LimiterError> {
        let key = Self::key(tenant_id);
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.connection().await?;

        let (count,): (usize,) = ::redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(self.stale_bound(now_ms))
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(count)
    }

    fn max_per_tenant(&self) -> usize {
        self.config.max_per_tenant
    }

    async fn ping(&self) -> Result<(), LimiterError> {
        let mut conn = self.connection().await?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
