// crates/server/src/metrics.rs
//! Pipeline metrics for Prometheus.
//!
//! The recorder is installed once at startup; until then every `record_*`
//! call is a no-op, so the pipeline can run in tests without it.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::live::DeliveryReport;
use crate::sync::CycleReport;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Returns `false` if one is already set.
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
    describe_histogram!(
        "reconcile_cycle_duration_seconds",
        "Duration of reconcile cycles in seconds"
    );
    describe_counter!("reconcile_cycles_total", "Reconcile cycles by outcome");
    describe_counter!("reconcile_jobs_failed_total", "Per-job reconcile failures");
    describe_counter!(
        "log_lines_forwarded_total",
        "Log lines handed to the batched writer"
    );
    describe_counter!(
        "log_lines_lost_total",
        "Log lines trimmed before they could be synced"
    );

    describe_counter!("writer_flushes_total", "Batched writer flushes by trigger and outcome");
    describe_histogram!("writer_flush_records", "Records per flush");
    describe_histogram!("writer_flush_duration_seconds", "Sink call duration in seconds");

    describe_counter!("fanout_delivered_total", "Live lines delivered to subscribers");
    describe_counter!("fanout_dropped_total", "Live lines dropped on full mailboxes");
    describe_counter!("fanout_malformed_total", "Malformed channel messages dropped");
}

/// Render current metrics in Prometheus text format, if initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_cycle(report: &CycleReport, duration: Duration) {
    histogram!("reconcile_cycle_duration_seconds").record(duration.as_secs_f64());
    counter!("reconcile_cycles_total", "outcome" => "ok").increment(1);
    counter!("reconcile_jobs_failed_total").increment(report.jobs_failed);
    counter!("log_lines_forwarded_total").increment(report.lines_forwarded);
    counter!("log_lines_lost_total").increment(report.lines_lost);
    gauge!("reconcile_jobs_seen").set(report.jobs_seen as f64);
}

pub fn record_cycle_failure() {
    counter!("reconcile_cycles_total", "outcome" => "aborted").increment(1);
}

pub fn record_flush(trigger: &'static str, records: usize, duration: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("writer_flushes_total", "trigger" => trigger, "outcome" => outcome).increment(1);
    histogram!("writer_flush_records").record(records as f64);
    histogram!("writer_flush_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_delivery(report: &DeliveryReport) {
    counter!("fanout_delivered_total").increment(report.delivered as u64);
    counter!("fanout_dropped_total").increment(report.dropped as u64);
}

pub fn record_malformed_message() {
    counter!("fanout_malformed_total").increment(1);
}
