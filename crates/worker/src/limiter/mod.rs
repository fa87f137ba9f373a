//! Tenant concurrency limiter
//!
//! A best-effort distributed semaphore: each tenant has an ordered set of
//! `execution_id -> acquired_at`. Entries older than the staleness window are
//! purged before every count, so slots held by crashed workers heal on their
//! own. Double-acquire races between processes are tolerated; an acquired
//! slot is advisory capacity, not exclusive ownership of the execution.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub use memory::InMemoryTenantLimiter;
#[cfg(feature = "redis")]
pub use self::redis::RedisTenantLimiter;

/// Errors from the limiter store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("limiter store connection failed: {0}")]
    Connection(String),

    #[error("limiter store command failed: {0}")]
    Store(String),
}

/// Limiter tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Concurrent executions allowed per tenant
    pub max_per_tenant: usize,
    /// Entries older than this no longer count toward the limit
    pub stale_after: Duration,
    /// Idle tenant sets expire after this long
    pub key_ttl: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_per_tenant: 5,
            stale_after: Duration::from_secs(3600),
            key_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl LimiterConfig {
    pub fn new(max_per_tenant: usize) -> Self {
        Self {
            max_per_tenant,
            ..Default::default()
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_key_ttl(mut self, key_ttl: Duration) -> Self {
        self.key_ttl = key_ttl;
        self
    }
}

/// Per-tenant admission control
#[async_trait]
pub trait TenantLimiter: Send + Sync {
    /// Take a slot for `execution_id`. `Ok(false)` means the tenant is at capacity.
    async fn acquire(&self, tenant_id: &str, execution_id: &str) -> Result<bool, LimiterError>;

    async fn release(&self, tenant_id: &str, execution_id: &str) -> Result<(), LimiterError>;

    /// Live (non-stale) slots held by the tenant
    async fn current_count(&self, tenant_id: &str) -> Result<usize, LimiterError>;

    fn max_per_tenant(&self) -> usize;

    /// Connectivity check for health reporting
    async fn ping(&self) -> Result<(), LimiterError> {
        Ok(())
    }
}

/// An acquired tenant slot.
///
/// Call [`release`](Self::release) on the normal path. If the slot is dropped
/// without it (timeout, cancellation, panic) the release is spawned onto the
/// runtime instead.
pub struct TenantSlot {
    limiter: Arc<dyn TenantLimiter>,
    tenant_id: String,
    execution_id: String,
    released: bool,
}

impl TenantSlot {
    /// Try to take a slot. `Ok(None)` means the tenant is at capacity.
    pub async fn acquire(
        limiter: Arc<dyn TenantLimiter>,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Option<Self>, LimiterError> {
        if !limiter.acquire(tenant_id, execution_id).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            limiter,
            tenant_id: tenant_id.to_string(),
            execution_id: execution_id.to_string(),
            released: false,
        }))
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self
            .limiter
            .release(&self.tenant_id, &self.execution_id)
            .await
        {
            warn!(
                tenant_id = %self.tenant_id,
                execution_id = %self.execution_id,
                error = %e,
                "Failed to release tenant slot; it expires with the staleness window"
            );
        }
    }
}

impl Drop for TenantSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let limiter = Arc::clone(&self.limiter);
        let tenant_id = std::mem::take(&mut self.tenant_id);
        let execution_id = std::mem::take(&mut self.execution_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = limiter.release(&tenant_id, &execution_id).await {
                        warn!(%tenant_id, %execution_id, error = %e, "Deferred tenant slot release failed");
                    } else {
                        debug!(%tenant_id, %execution_id, "Released tenant slot on drop");
                    }
                });
            }
            Err(_) => {
                warn!(%tenant_id, %execution_id, "No runtime to release tenant slot; it expires with the staleness window");
            }
        }
    }
}
