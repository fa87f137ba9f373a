// Execution message - the unit of queued work
//
// Wire format is a JSON object with snake_case fields. Unknown fields are
// ignored on read so producers can add fields ahead of consumers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MessageError;

/// Queryable metadata sent alongside the JSON body
pub type MessageAttributes = BTreeMap<String, String>;

/// Attribute names carried next to the message body
pub mod attribute {
    pub const TENANT_ID: &str = "tenant_id";
    pub const WORKFLOW_ID: &str = "workflow_id";
    pub const TRIGGER_TYPE: &str = "trigger_type";
    pub const CORRELATION_ID: &str = "correlation_id";
}

/// A request to run one workflow execution.
///
/// Created by a producer when a trigger fires, published once, and
/// re-delivered by the queue until a consumer deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub execution_id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub workflow_version: i32,
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_data: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    /// Incremented by the retry path; never decreases
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ExecutionMessage {
    /// Create a new message stamped with the current time
    pub fn new(
        execution_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_version: i32,
        trigger_type: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            workflow_version,
            trigger_type: trigger_type.into(),
            trigger_data: None,
            enqueued_at: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn with_trigger_data(mut self, data: Value) -> Self {
        self.trigger_data = Some(data);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the retry counter. Values below the current count are ignored.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = self.retry_count.max(retry_count);
        self
    }

    /// Copy of this message with the retry counter bumped by one
    pub fn next_retry(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = self.retry_count.saturating_add(1);
        next
    }

    /// Check the identity fields. Returns the first offending field.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.execution_id.trim().is_empty() {
            return Err(MessageError::MissingExecutionId);
        }
        if self.tenant_id.trim().is_empty() {
            return Err(MessageError::MissingTenantId);
        }
        if self.workflow_id.trim().is_empty() {
            return Err(MessageError::MissingWorkflowId);
        }
        if self.workflow_version <= 0 {
            return Err(MessageError::InvalidWorkflowVersion(self.workflow_version));
        }
        if self.trigger_type.trim().is_empty() {
            return Err(MessageError::MissingTriggerType);
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(body: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Metadata attributes published next to the body
    pub fn attributes(&self) -> MessageAttributes {
        let mut attrs = MessageAttributes::new();
        attrs.insert(attribute::TENANT_ID.to_string(), self.tenant_id.clone());
        attrs.insert(attribute::WORKFLOW_ID.to_string(), self.workflow_id.clone());
        attrs.insert(attribute::TRIGGER_TYPE.to_string(), self.trigger_type.clone());
        if let Some(correlation_id) = &self.correlation_id {
            attrs.insert(attribute::CORRELATION_ID.to_string(), correlation_id.clone());
        }
        attrs
    }

    /// Build a message from a loosely-typed JSON object.
    ///
    /// Identifiers may arrive as strings or numbers, `workflow_version` as an
    /// integer, an integral float or a numeric string. Missing fields are left
    /// empty and reported by [`validate`](Self::validate), which runs before
    /// returning.
    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        let map = value.as_object().ok_or_else(|| MessageError::InvalidField {
            field: "message",
            reason: "expected a JSON object".to_string(),
        })?;

        let enqueued_at = match map.get("enqueued_at") {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| MessageError::InvalidField {
                    field: "enqueued_at",
                    reason: e.to_string(),
                })?,
            _ => Utc::now(),
        };

        let message = Self {
            execution_id: coerce_string(map, "execution_id")?.unwrap_or_default(),
            tenant_id: coerce_string(map, "tenant_id")?.unwrap_or_default(),
            workflow_id: coerce_string(map, "workflow_id")?.unwrap_or_default(),
            workflow_version: coerce_version(map)?,
            trigger_type: coerce_string(map, "trigger_type")?.unwrap_or_default(),
            trigger_data: map.get("trigger_data").filter(|v| !v.is_null()).cloned(),
            enqueued_at,
            retry_count: coerce_retry_count(map)?,
            correlation_id: coerce_string(map, "correlation_id")?.filter(|s| !s.is_empty()),
        };

        message.validate()?;
        Ok(message)
    }
}

fn coerce_string(map: &Map<String, Value>, field: &'static str) -> Result<Option<String>, MessageError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(MessageError::InvalidField {
            field,
            reason: format!("expected string, got {}", json_type(other)),
        }),
    }
}

fn coerce_version(map: &Map<String, Value>) -> Result<i32, MessageError> {
    const FIELD: &str = "workflow_version";
    let invalid = |reason: String| MessageError::InvalidField {
        field: FIELD,
        reason,
    };

    let raw: i64 = match map.get(FIELD) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 => f as i64,
            _ => return Err(invalid(format!("{} is not an integer", n))),
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| invalid(format!("'{}': {}", s, e)))?,
        Some(other) => return Err(invalid(format!("expected number, got {}", json_type(other)))),
    };

    i32::try_from(raw).map_err(|_| invalid(format!("{} is out of range", raw)))
}

fn coerce_retry_count(map: &Map<String, Value>) -> Result<u32, MessageError> {
    match map.get("retry_count") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| MessageError::InvalidField {
                field: "retry_count",
                reason: format!("{} is not a non-negative integer", n),
            }),
        Some(other) => Err(MessageError::InvalidField {
            field: "retry_count",
            reason: format!("expected number, got {}", json_type(other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
