//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters, histograms, gauges)
//! - Helper functions for recording metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("rpc_calls_total", "Calls dispatched, by transport and outcome");
    describe_histogram!(
        "rpc_call_duration_seconds",
        "Time from first byte read to reply encoded"
    );
    describe_counter!("registry_persists_total", "Snapshot writes, by trigger and result");
    describe_histogram!("registry_persist_duration_seconds", "Duration of snapshot writes");
    describe_gauge!("stream_connections_open", "Open stream transport connections");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record one dispatched call.
///
/// # Arguments
/// * `transport` - "ws" or "http"
/// * `outcome` - "ok" or the call error kind
/// * `duration` - Dispatch duration
pub fn record_call(transport: &'static str, outcome: &'static str, duration: Duration) {
    counter!("rpc_calls_total", "transport" => transport, "outcome" => outcome).increment(1);
    histogram!("rpc_call_duration_seconds", "transport" => transport)
        .record(duration.as_secs_f64());
}

/// Record a registry persist.
///
/// # Arguments
/// * `trigger` - "timer" or "shutdown"
/// * `ok` - Whether the snapshot was written
pub fn record_persist(trigger: &'static str, ok: bool, duration: Duration) {
    let result = if ok { "ok" } else { "error" };
    counter!("registry_persists_total", "trigger" => trigger, "result" => result).increment(1);
    histogram!("registry_persist_duration_seconds").record(duration.as_secs_f64());
}

/// Update the open stream connection gauge.
pub fn record_open_connections(count: usize) {
    gauge!("stream_connections_open").set(count as f64);
}

/// Helper for timing one call.
///
/// Usage:
/// ```ignore
/// let timer = CallTimer::new("ws");
/// let reply = codec.dispatch(reader).await?;
/// timer.finish(reply.outcome());
/// ```
pub struct CallTimer {
    transport: &'static str,
    start: Instant,
}

impl CallTimer {
    pub fn new(transport: &'static str) -> Self {
        Self {
            transport,
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &'static str) {
        record_call(self.transport, outcome, self.start.elapsed());
    }
}
