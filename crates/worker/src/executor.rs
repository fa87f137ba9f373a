//! HTTP executor adapter
//!
//! Hands an execution to the workflow engine by POSTing the execution record
//! as JSON. Any non-2xx response is an execution failure.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use flowq_core::{Execution, Executor, ExecutorError};
use reqwest::Client;
use tracing::{debug, instrument};

/// Executor backed by an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    url: String,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build executor HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, tenant_id = %execution.tenant_id))]
    async fn execute(&self, execution: &Execution) -> Result<(), ExecutorError> {
        let response = self
            .client
            .post(&self.url)
            .json(execution)
            .send()
            .await
            .with_context(|| format!("failed to reach executor at {}", self.url))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Executor accepted execution");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ExecutorError::failed(format!(
            "executor returned {}: {}",
            status,
            body.trim()
        )))
    }
}
