// Execution domain types
//
// An execution is one concrete run of a workflow, identified by tenant + id.
// The record is owned by the workflow store; the queue core only loads it
// and moves it through its status transitions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution status.
/// - `pending`: Queued or waiting for a worker
/// - `running`: Picked up by a worker
/// - `completed`: Executor returned success
/// - `failed`: Executor failed, or the execution timed out
/// - `cancelled`: Stopped by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Execution record as loaded from the workflow store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub workflow_version: i32,
    pub status: ExecutionStatus,
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Not claimable before this time (set when a claim is deferred)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_at: Option<DateTime<Utc>>,
    /// Times a claim was handed back because the tenant was at capacity
    #[serde(default)]
    pub requeue_count: u32,
}

impl Execution {
    /// New pending execution created now
    pub fn pending(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_version: i32,
        trigger_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: ExecutionStatus::Pending,
            trigger_type: trigger_type.into(),
            trigger_data: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            available_at: None,
            requeue_count: 0,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_trigger_data(mut self, data: Value) -> Self {
        self.trigger_data = Some(data);
        self
    }

    /// Whether a polling claim may pick this execution up at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Pending && self.available_at.map_or(true, |at| at <= now)
    }

    /// Hand a claimed execution back as pending, hidden for `delay`
    pub fn defer(&mut self, delay: std::time::Duration) {
        self.transition(ExecutionStatus::Pending, None);
        self.available_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay));
        self.requeue_count = self.requeue_count.saturating_add(1);
    }

    /// Apply a status transition, stamping start/completion times
    pub fn transition(&mut self, status: ExecutionStatus, error_message: Option<&str>) {
        let now = Utc::now();
        match status {
            ExecutionStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            ExecutionStatus::Pending => {
                self.started_at = None;
            }
            s if s.is_terminal() => {
                self.completed_at = Some(now);
            }
            _ => {}
        }
        self.status = status;
        self.error_message = error_message.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut exec = Execution::pending("e1", "t1", "w1", 1, "webhook");
        exec.transition(ExecutionStatus::Running, None);
        assert!(exec.started_at.is_some());
        assert!(exec.completed_at.is_none());

        exec.transition(ExecutionStatus::Failed, Some("execution timeout"));
        assert!(exec.completed_at.is_some());
        assert_eq!(exec.error_message.as_deref(), Some("execution timeout"));
    }

    #[test]
    fn test_deferred_execution_is_not_claimable_until_due() {
        let mut exec = Execution::pending("e1", "t1", "w1", 1, "webhook");
        let now = Utc::now();
        assert!(exec.is_claimable(now));

        exec.transition(ExecutionStatus::Running, None);
        assert!(!exec.is_claimable(now));

        exec.defer(std::time::Duration::from_secs(30));
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.requeue_count, 1);
        assert!(!exec.is_claimable(now));
        assert!(exec.is_claimable(now + chrono::Duration::seconds(31)));
    }
}
