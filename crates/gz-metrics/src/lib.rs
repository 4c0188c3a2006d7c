//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the monitor.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was asked for.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Stream, history, and fetch instrumentation for the live monitor.
#[derive(Clone, Debug)]
pub struct MonitorMetrics {
    registry: SharedRegistry,
    frames: IntCounterVec,
    rejected: IntCounterVec,
    connection_state: IntGauge,
    reconnects: IntCounter,
    history_len: IntGauge,
    window_co2: Gauge,
    fetches: IntCounterVec,
    build_info: GaugeVec,
}

impl MonitorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames = IntCounterVec::new(
            Opts::new("gz_frames_total", "Stream frames by decode outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(frames.clone()))?;

        let rejected = IntCounterVec::new(
            Opts::new(
                "gz_frames_rejected_total",
                "Dropped stream frames by rejection reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rejected.clone()))?;

        let connection_state = IntGauge::with_opts(Opts::new(
            "gz_connection_state",
            "Stream connection state (0 disconnected, 1 connecting, 2 connected)",
        ))?;
        registry.register(Box::new(connection_state.clone()))?;

        let reconnects = IntCounter::with_opts(Opts::new(
            "gz_reconnects_total",
            "Connection attempts made after the first one",
        ))?;
        registry.register(Box::new(reconnects.clone()))?;

        let history_len = IntGauge::with_opts(Opts::new(
            "gz_history_len",
            "Readings currently held in the history window",
        ))?;
        registry.register(Box::new(history_len.clone()))?;

        let window_co2 = Gauge::with_opts(Opts::new(
            "gz_window_co2_saved_kg",
            "CO2 saved summed over the history window only",
        ))?;
        registry.register(Box::new(window_co2.clone()))?;

        let fetches = IntCounterVec::new(
            Opts::new("gz_fetch_total", "REST resource fetches by outcome"),
            &["resource", "outcome"],
        )?;
        registry.register(Box::new(fetches.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("gz_monitor_build_info", "Build metadata for the running monitor"),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            frames,
            rejected,
            connection_state,
            reconnects,
            history_len,
            window_co2,
            fetches,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// `outcome` is one of `accepted`, `unrecognized`, `rejected`.
    pub fn record_frame(&self, outcome: &str) {
        self.frames.with_label_values(&[outcome]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.record_frame("rejected");
        self.rejected.with_label_values(&[reason]).inc();
    }

    pub fn set_connection_state(&self, value: i64) {
        self.connection_state.set(value);
    }

    pub fn inc_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn observe_window(&self, history_len: usize, co2_saved_kg: f64) {
        self.history_len.set(history_len as i64);
        self.window_co2.set(co2_saved_kg);
    }

    pub fn record_fetch(&self, resource: &str, outcome: &str) {
        self.fetches.with_label_values(&[resource, outcome]).inc();
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1.0);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(registry: &Registry, name: &str, label: (&str, &str)) -> f64 {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)
            .and_then(|family| {
                family
                    .get_metric()
                    .iter()
                    .find(|metric| {
                        metric
                            .get_label()
                            .iter()
                            .any(|pair| pair.get_name() == label.0 && pair.get_value() == label.1)
                    })
                    .map(|metric| metric.get_counter().get_value())
            })
            .unwrap_or_default()
    }

    #[test]
    fn rejection_counts_as_rejected_frame() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        metrics.record_frame("accepted");
        metrics.record_rejection("json");
        metrics.record_rejection("json");
        assert_eq!(counter(&registry, "gz_frames_total", ("outcome", "accepted")), 1.0);
        assert_eq!(counter(&registry, "gz_frames_total", ("outcome", "rejected")), 2.0);
        assert_eq!(counter(&registry, "gz_frames_rejected_total", ("reason", "json")), 2.0);
    }

    #[test]
    fn double_registration_is_an_error() {
        let registry = new_registry();
        MonitorMetrics::new(registry.clone()).unwrap();
        assert!(MonitorMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_text_format() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        metrics.set_connection_state(2);
        metrics.observe_window(3, 9.0);

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("gz_connection_state 2"));
        assert!(body.contains("gz_window_co2_saved_kg 9"));
        server.shutdown().await.unwrap();
    }
}
