//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Step outcomes per chain family and strategy
//! - Action status transitions
//! - Confirmation watcher polls and dedup hits
//! - Task latency

use crate::chain::ChainType;
use crate::error::ErrorCode;
use crate::pipeline::ExecutionStrategy;
use crate::step::{ActionStatus, ActionType};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

lazy_static! {
    // Step metrics
    pub static ref STEPS_STARTED: CounterVec = register_counter_vec!(
        "crossroute_steps_started_total",
        "Step executions started",
        &["family", "strategy"]
    ).unwrap();

    pub static ref STEPS_COMPLETED: CounterVec = register_counter_vec!(
        "crossroute_steps_completed_total",
        "Step executions completed",
        &["family", "strategy"]
    ).unwrap();

    pub static ref STEPS_PAUSED: CounterVec = register_counter_vec!(
        "crossroute_steps_paused_total",
        "Step executions paused awaiting user interaction",
        &["family", "strategy"]
    ).unwrap();

    pub static ref STEPS_FAILED: CounterVec = register_counter_vec!(
        "crossroute_steps_failed_total",
        "Step executions failed by error code",
        &["family", "strategy", "code"]
    ).unwrap();

    pub static ref STEP_RETRIES: CounterVec = register_counter_vec!(
        "crossroute_step_retries_total",
        "Whole-step retries requested by a task",
        &["family"]
    ).unwrap();

    // Action metrics
    pub static ref ACTION_TRANSITIONS: CounterVec = register_counter_vec!(
        "crossroute_action_transitions_total",
        "Action status transitions",
        &["action", "status"]
    ).unwrap();

    // Watcher metrics
    pub static ref WATCHER_POLLS: CounterVec = register_counter_vec!(
        "crossroute_watcher_polls_total",
        "Confirmation watcher polls",
        &["watcher"]
    ).unwrap();

    pub static ref WATCHER_DEDUP_HITS: CounterVec = register_counter_vec!(
        "crossroute_watcher_dedup_hits_total",
        "Watch requests served by an in-flight poll",
        &["watcher"]
    ).unwrap();

    pub static ref TASK_LATENCY: HistogramVec = register_histogram_vec!(
        "crossroute_task_latency_seconds",
        "Pipeline task run time",
        &["task", "strategy"],
        vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_step_started(family: ChainType, strategy: ExecutionStrategy) {
    STEPS_STARTED
        .with_label_values(&[family.as_str(), strategy.as_str()])
        .inc();
}

pub fn record_step_completed(family: ChainType, strategy: ExecutionStrategy) {
    STEPS_COMPLETED
        .with_label_values(&[family.as_str(), strategy.as_str()])
        .inc();
}

pub fn record_step_paused(family: ChainType, strategy: ExecutionStrategy) {
    STEPS_PAUSED
        .with_label_values(&[family.as_str(), strategy.as_str()])
        .inc();
}

pub fn record_step_failed(family: ChainType, strategy: ExecutionStrategy, code: ErrorCode) {
    STEPS_FAILED
        .with_label_values(&[family.as_str(), strategy.as_str(), code.name()])
        .inc();
}

pub fn record_step_retry(family: ChainType) {
    STEP_RETRIES.with_label_values(&[family.as_str()]).inc();
}

pub fn record_action_transition(action_type: ActionType, status: ActionStatus) {
    ACTION_TRANSITIONS
        .with_label_values(&[action_type.as_str(), status.as_str()])
        .inc();
}

pub fn record_watcher_poll(watcher: &'static str) {
    WATCHER_POLLS.with_label_values(&[watcher]).inc();
}

pub fn record_watcher_dedup(watcher: &'static str) {
    WATCHER_DEDUP_HITS.with_label_values(&[watcher]).inc();
}

pub fn record_task_latency(task: &'static str, strategy: ExecutionStrategy, secs: f64) {
    TASK_LATENCY
        .with_label_values(&[task, strategy.as_str()])
        .observe(secs);
}
