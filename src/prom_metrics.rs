//! # Prometheus Metrics — Exposition for the CICD Bridge
//!
//! Exposes paramstore operational metrics in the Prometheus text exposition
//! format. Counters get the `_total` suffix from the encoder.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `paramstore_http_request_duration_seconds` | Histogram | `method`, `path` | API latency |
//! | `paramstore_secrets_synced_total` | Counter | `outcome` | Secret upserts by outcome |
//! | `paramstore_reruns_total` | Counter | `status` | Rerun dispatches by response status |
//! | `paramstore_poll_sweeps_total` | Counter | — | Completed poller sweeps |
//! | `paramstore_workflow_logs_completed_total` | Counter | — | Logs finalised by the poller |
//! | `paramstore_provider_errors_total` | Counter | `kind` | Provider failures by taxonomy kind |
//!
//! The `/metrics` endpoint renders the current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabel {
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabel {
    pub kind: String,
}

type HistogramFamily = Family<HttpLabels, Histogram, fn() -> Histogram>;

fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Thread-safe metrics registry. All metric types are atomic.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: HistogramFamily,
    pub secrets_synced: Family<OutcomeLabel, Counter>,
    pub reruns: Family<StatusLabel, Counter>,
    pub poll_sweeps: Counter,
    pub workflow_logs_completed: Counter,
    pub provider_errors: Family<KindLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration: HistogramFamily =
            Family::new_with_constructor(latency_histogram as fn() -> Histogram);
        registry.register(
            "paramstore_http_request_duration_seconds",
            "HTTP request latency by method and matched path",
            http_request_duration.clone(),
        );

        let secrets_synced = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "paramstore_secrets_synced",
            "Secret upserts by outcome (created, updated, failed)",
            secrets_synced.clone(),
        );

        let reruns = Family::<StatusLabel, Counter>::default();
        registry.register(
            "paramstore_reruns",
            "Rerun dispatches by response status",
            reruns.clone(),
        );

        let poll_sweeps = Counter::default();
        registry.register(
            "paramstore_poll_sweeps",
            "Completed run-status poller sweeps",
            poll_sweeps.clone(),
        );

        let workflow_logs_completed = Counter::default();
        registry.register(
            "paramstore_workflow_logs_completed",
            "Workflow logs finalised as completed",
            workflow_logs_completed.clone(),
        );

        let provider_errors = Family::<KindLabel, Counter>::default();
        registry.register(
            "paramstore_provider_errors",
            "Provider call failures by kind",
            provider_errors.clone(),
        );

        Self {
            registry,
            http_request_duration,
            secrets_synced,
            reruns,
            poll_sweeps,
            workflow_logs_completed,
            provider_errors,
        }
    }

    pub fn observe_request(&self, method: &str, path: &str, seconds: f64) {
        self.http_request_duration
            .get_or_create(&HttpLabels {
                method: method.to_string(),
                path: path.to_string(),
            })
            .observe(seconds);
    }

    pub fn secret_synced(&self, outcome: &str) {
        self.secrets_synced
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn rerun(&self, status: u16) {
        self.reruns
            .get_or_create(&StatusLabel {
                status: status.to_string(),
            })
            .inc();
    }

    pub fn provider_error(&self, kind: &str) {
        self.provider_errors
            .get_or_create(&KindLabel {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if encode(&mut buf, &self.registry).is_err() {
            buf.clear();
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
