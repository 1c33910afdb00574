//! Health probes and Prometheus metrics.
//!
//! - `GET /healthz` always `ok` while the process serves requests
//! - `GET /readyz` `ok` once the first CA infrastructure pass succeeded
//! - `GET /metrics` Prometheus text format

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// Reconcile counters and readiness flag shared by every controller loop.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    duration: HistogramVec,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("auto_mtls_reconciles_total", "Reconcile invocations by controller and outcome"),
            &["controller", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("auto_mtls_reconcile_duration_seconds", "Reconcile latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["controller"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            duration,
            ready: AtomicBool::new(false),
        })
    }

    /// Records one reconcile of `controller` ending in `outcome`.
    pub fn record(&self, controller: &str, outcome: &str, elapsed: Duration) {
        self.reconciles.with_label_values(&[controller, outcome]).inc();
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Current registry contents in Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut out = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut out)?;
        Ok(out)
    }
}

/// Probe and metrics routes.
pub fn routes(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for CA infrastructure")
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Serves [`routes`] on `addr` until the task is dropped.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health and metrics endpoint listening on {}", addr);
    axum::serve(listener, routes(metrics)).await?;
    Ok(())
}
