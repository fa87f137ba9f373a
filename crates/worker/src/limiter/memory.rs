//! In-process tenant limiter, for single-worker deployments and tests

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{LimiterConfig, LimiterError, TenantLimiter};

struct TenantSet {
    entries: HashMap<String, Instant>,
    touched_at: Instant,
}

/// Same semantics as the Redis limiter, scoped to one process
pub struct InMemoryTenantLimiter {
    config: LimiterConfig,
    tenants: Mutex<HashMap<String, TenantSet>>,
}

impl InMemoryTenantLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired tenant sets and stale entries, returning the live count
    fn purge(&self, tenants: &mut HashMap<String, TenantSet>, tenant_id: &str, now: Instant) -> usize {
        let expired = tenants
            .get(tenant_id)
            .is_some_and(|set| now.saturating_duration_since(set.touched_at) >= self.config.key_ttl);
        if expired {
            tenants.remove(tenant_id);
        }

        match tenants.get_mut(tenant_id) {
            Some(set) => {
                let stale_after = self.config.stale_after;
                set.entries
                    .retain(|_, acquired_at| now.saturating_duration_since(*acquired_at) < stale_after);
                set.entries.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl TenantLimiter for InMemoryTenantLimiter {
    async fn acquire(&self, tenant_id: &str, execution_id: &str) -> Result<bool, LimiterError> {
        let now = Instant::now();
        let mut tenants = self.tenants.lock();
        let count = self.purge(&mut tenants, tenant_id, now);

        let held = tenants
            .get(tenant_id)
            .is_some_and(|set| set.entries.contains_key(execution_id));
        if !held && count >= self.config.max_per_tenant {
            return Ok(false);
        }

        let set = tenants.entry(tenant_id.to_string()).or_insert_with(|| TenantSet {
            entries: HashMap::new(),
            touched_at: now,
        });
        set.entries.insert(execution_id.to_string(), now);
        set.touched_at = now;
        Ok(true)
    }

    async fn release(&self, tenant_id: &str, execution_id: &str) -> Result<(), LimiterError> {
        let mut tenants = self.tenants.lock();
        if let Some(set) = tenants.get_mut(tenant_id) {
            set.entries.remove(execution_id);
            if set.entries.is_empty() {
                tenants.remove(tenant_id);
            }
        }
        Ok(())
    }

    async fn current_count(&self, tenant_id: &str) -> Result<usize, LimiterError> {
        let mut tenants = self.tenants.lock();
        Ok(self.purge(&mut tenants, tenant_id, Instant::now()))
    }

    fn max_per_tenant(&self) -> usize {
        self.config.max_per_tenant
    }
}
