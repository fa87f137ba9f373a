//! Execution repositories
//!
//! - [`PostgresExecutionRepository`] reads and updates `workflow_executions`
//!   and claims pending work with `FOR UPDATE SKIP LOCKED`
//! - [`InMemoryExecutionRepository`] provides the same semantics in process

mod memory;
mod postgres;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use memory::InMemoryExecutionRepository;
pub use postgres::PostgresExecutionRepository;

/// Creation time before which an execution counts as stale
pub(crate) fn stale_cutoff(older_than: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
