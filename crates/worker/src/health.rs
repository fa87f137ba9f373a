//! Health server
//!
//! - `GET /health/live` - 200 while the process runs
//! - `GET /health/ready` - 503 until marked ready, 503 `at_capacity` once
//!   active executions reach the worker capacity, otherwise 200
//! - `GET /health` - dependency status, counters and queue metrics

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use flowq_core::ExecutionRepository;
use flowq_queue::{MetricsCollector, MetricsStatus, QueueTransport};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::WorkerMode;
use crate::consumer::{SlotState, SlotStates};
use crate::limiter::TenantLimiter;
use crate::stats::{WorkerStats, WorkerStatsSnapshot};

/// A dependency reported in the detailed health view
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), String>;
}

/// Execution store connectivity
pub struct RepositoryCheck(pub Arc<dyn ExecutionRepository>);

#[async_trait]
impl DependencyCheck for RepositoryCheck {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

/// Tenant limiter store connectivity
pub struct LimiterCheck(pub Arc<dyn TenantLimiter>);

#[async_trait]
impl DependencyCheck for LimiterCheck {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

/// Queue reachability, via an attributes fetch
pub struct QueueCheck(pub Arc<dyn QueueTransport>);

#[async_trait]
impl DependencyCheck for QueueCheck {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.get_attributes().await.map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Shared state behind the health routes
#[derive(Clone)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
    worker_id: String,
    mode: WorkerMode,
    capacity: usize,
    stats: Arc<WorkerStats>,
    slots: Option<Arc<SlotStates>>,
    checks: Vec<Arc<dyn DependencyCheck>>,
    metrics: Option<(Arc<MetricsCollector>, u64)>,
}

impl HealthState {
    pub fn new(
        worker_id: impl Into<String>,
        mode: WorkerMode,
        capacity: usize,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            worker_id: worker_id.into(),
            mode,
            capacity,
            stats,
            slots: None,
            checks: Vec::new(),
            metrics: None,
        }
    }

    /// Share an existing readiness flag
    pub fn with_ready_flag(mut self, ready: Arc<AtomicBool>) -> Self {
        self.ready = ready;
        self
    }

    pub fn with_slots(mut self, slots: Arc<SlotStates>) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn with_check(mut self, check: Arc<dyn DependencyCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Include queue metrics status, unhealthy above `max_depth`
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>, max_depth: u64) -> Self {
        self.metrics = Some((collector, max_depth));
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct DetailedHealth {
    status: &'static str,
    version: &'static str,
    worker_id: String,
    mode: WorkerMode,
    capacity: usize,
    workers: WorkerStatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    slots: Option<Vec<SlotState>>,
    dependencies: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<MetricsStatus>,
}

/// Health routes with request tracing
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive", "time": Utc::now() }))
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        );
    }
    if state.stats.is_at_capacity(state.capacity) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "at_capacity",
                "active": state.stats.active(),
                "capacity": state.capacity,
            })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let results = futures::future::join_all(state.checks.iter().map(|check| async move {
        let status = match check.check().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        };
        (check.name(), status)
    }))
    .await;

    let healthy = results.iter().all(|(_, status)| status == "ok");
    let body = DetailedHealth {
        status: if healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        worker_id: state.worker_id.clone(),
        mode: state.mode,
        capacity: state.capacity,
        workers: state.stats.snapshot(),
        slots: state.slots.as_ref().map(|slots| slots.snapshot()),
        dependencies: results.into_iter().collect(),
        queue: state
            .metrics
            .as_ref()
            .map(|(collector, max_depth)| collector.status(*max_depth)),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
