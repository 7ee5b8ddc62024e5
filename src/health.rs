//! Probe and metrics endpoints of the operator
//!
//! `/healthz` answers as long as the process runs, `/readyz` once the Dogu
//! controller is running and `/metrics` serves the Prometheus registry. The
//! server runs on every replica, leader or not.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{error, info};

const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DoguLabels {
    pub namespace: String,
    pub dogu: String,
}

impl DoguLabels {
    fn new(namespace: &str, dogu: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            dogu: dogu.to_string(),
        }
    }
}

/// Where a pipeline stopped and why
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HaltLabels {
    pub pipeline: String,
    pub step: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UseCaseLabels {
    pub use_case: String,
}

/// Operator metrics, all prefixed with `dogu_operator_`
pub struct Metrics {
    passes: Family<DoguLabels, Counter>,
    failed_passes: Family<DoguLabels, Counter>,
    pass_duration: Family<DoguLabels, Histogram>,
    use_cases: Family<UseCaseLabels, Counter>,
    halts: Family<HaltLabels, Counter>,
    settled: Family<DoguLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("dogu_operator");

        let passes = Family::<DoguLabels, Counter>::default();
        registry.register("reconciliations", "Reconcile passes per dogu", passes.clone());

        let failed_passes = Family::<DoguLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Reconcile passes per dogu that ended in an error",
            failed_passes.clone(),
        );

        let pass_duration = Family::<DoguLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.005, 2.0, 14))
        });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconcile pass",
            pass_duration.clone(),
        );

        let use_cases = Family::<UseCaseLabels, Counter>::default();
        registry.register("use_case_runs", "Reconcile passes per use case", use_cases.clone());

        let halts = Family::<HaltLabels, Counter>::default();
        registry.register(
            "pipeline_halts",
            "Pipelines stopped by a step that did not continue",
            halts.clone(),
        );

        let settled = Family::<DoguLabels, Gauge>::default();
        registry.register(
            "dogu_settled",
            "1 when the last pass of a dogu completed every step",
            settled.clone(),
        );

        Self {
            passes,
            failed_passes,
            pass_duration,
            use_cases,
            halts,
            settled,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, dogu: &str, duration_secs: f64) {
        let labels = DoguLabels::new(namespace, dogu);
        self.passes.get_or_create(&labels).inc();
        self.pass_duration.get_or_create(&labels).observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, dogu: &str) {
        self.failed_passes
            .get_or_create(&DoguLabels::new(namespace, dogu))
            .inc();
    }

    pub fn record_use_case(&self, use_case: &str) {
        self.use_cases
            .get_or_create(&UseCaseLabels {
                use_case: use_case.to_string(),
            })
            .inc();
    }

    /// Count a pipeline stopped by `step` with the given outcome
    pub fn record_halt(&self, pipeline: &str, step: &str, outcome: &str) {
        self.halts
            .get_or_create(&HaltLabels {
                pipeline: pipeline.to_string(),
                step: step.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn set_dogu_settled(&self, namespace: &str, dogu: &str, settled: bool) {
        self.settled
            .get_or_create(&DoguLabels::new(namespace, dogu))
            .set(i64::from(settled));
    }

    fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// State shared between the controller and the probe server
pub struct HealthState {
    ready: AtomicBool,
    /// Unix seconds of the last finished pass, 0 before the first one
    last_reconcile: AtomicI64,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            last_reconcile: AtomicI64::new(0),
            metrics: Metrics::new(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_reconciled(&self, at: DateTime<Utc>) {
        self.last_reconcile.store(at.timestamp(), Ordering::Relaxed);
    }

    pub fn last_reconcile(&self) -> Option<DateTime<Utc>> {
        match self.last_reconcile.load(Ordering::Relaxed) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if !state.is_ready() {
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response();
    }
    match state.last_reconcile() {
        Some(at) => (StatusCode::OK, format!("ready, last reconcile {}", at.to_rfc3339())).into_response(),
        None => (StatusCode::OK, "ready").into_response(),
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, OPENMETRICS_TEXT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe and metrics endpoints on all interfaces
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
