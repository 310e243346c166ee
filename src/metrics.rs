use std::time::Instant;

use anyhow::{Context, Result};
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntGauge, Opts,
    Registry, TextEncoder,
};

const NAMESPACE: &str = "eventmaster";

/// Prometheus instruments shared by the ingestion server, the HTTP router
/// and the event store wrapper.
///
/// Every instrument is created and registered exactly once in [`Metrics::new`]
/// against a private registry. Instruments are internally atomic, so a single
/// `Arc<Metrics>` can be updated from any number of tasks.
pub struct Metrics {
    registry: Registry,

    // === HTTP server ===
    /// Latency in ms of HTTP requests grouped by route label.
    pub http_request_latency: HistogramVec,
    /// HTTP responses grouped by route label and status code.
    pub http_responses: CounterVec,

    // === rsyslog ingestion ===
    /// End-to-end handling time of one ingestion connection, in ms.
    pub ingest_latency: Histogram,
    /// Ingestion connections handled.
    pub ingest_requests: Counter,
    /// Ingested records by outcome (stored, unknown_topic, store_error, ...).
    pub ingest_records: CounterVec,
    /// Failed accept() calls on the ingestion listener.
    pub ingest_accept_errors: Counter,
    /// Ingestion connections currently being handled.
    pub ingest_connections_active: IntGauge,

    // === Event store ===
    /// Time of event store methods by method name, in ms.
    pub store_method_time: HistogramVec,
    /// Event store errors by store name and operation.
    pub store_db_errors: CounterVec,
}

impl Metrics {
    /// Creates all instruments and registers them.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_request_latency = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_ms",
                "Latency in ms of http requests grouped by req path.",
            )
            .namespace(NAMESPACE)
            .subsystem("http_server")
            .buckets(buckets()),
            &["path"],
        )?;
        let http_responses = CounterVec::new(
            Opts::new(
                "response_total",
                "The count of http responses issued classified by code and api endpoint.",
            )
            .namespace(NAMESPACE)
            .subsystem("http_server"),
            &["path", "code"],
        )?;

        let ingest_latency = Histogram::with_opts(
            HistogramOpts::new("request_latency", "Latency in ms of rsyslog requests.")
                .namespace(NAMESPACE)
                .subsystem("rsyslog_server")
                .buckets(buckets()),
        )?;
        let ingest_requests = Counter::with_opts(
            Opts::new("request_total", "The count of rsyslog requests received.")
                .namespace(NAMESPACE)
                .subsystem("rsyslog_server"),
        )?;
        let ingest_records = CounterVec::new(
            Opts::new(
                "records_total",
                "The count of rsyslog records processed by outcome.",
            )
            .namespace(NAMESPACE)
            .subsystem("rsyslog_server"),
            &["outcome"],
        )?;
        let ingest_accept_errors = Counter::with_opts(
            Opts::new(
                "accept_errors_total",
                "The count of failed accepts on the rsyslog listener.",
            )
            .namespace(NAMESPACE)
            .subsystem("rsyslog_server"),
        )?;
        let ingest_connections_active = IntGauge::with_opts(
            Opts::new(
                "connections_active",
                "Number of rsyslog connections currently being handled.",
            )
            .namespace(NAMESPACE)
            .subsystem("rsyslog_server"),
        )?;

        let store_method_time = HistogramVec::new(
            HistogramOpts::new(
                "method_time",
                "Time of event store methods by method name.",
            )
            .namespace(NAMESPACE)
            .subsystem("event_store")
            .buckets(buckets()),
            &["method"],
        )?;
        let store_db_errors = CounterVec::new(
            Opts::new(
                "db_error",
                "The count of db errors by db name and type of operation.",
            )
            .namespace(NAMESPACE)
            .subsystem("event_store"),
            &["db_name", "operation"],
        )?;

        registry
            .register(Box::new(http_request_latency.clone()))
            .context("registering http request latency")?;
        registry
            .register(Box::new(http_responses.clone()))
            .context("registering http response counter")?;
        registry
            .register(Box::new(ingest_latency.clone()))
            .context("registering rsyslog request latency")?;
        registry
            .register(Box::new(ingest_requests.clone()))
            .context("registering rsyslog request counter")?;
        registry
            .register(Box::new(ingest_records.clone()))
            .context("registering rsyslog record counter")?;
        registry
            .register(Box::new(ingest_accept_errors.clone()))
            .context("registering rsyslog accept error counter")?;
        registry
            .register(Box::new(ingest_connections_active.clone()))
            .context("registering rsyslog active connection gauge")?;
        registry
            .register(Box::new(store_method_time.clone()))
            .context("registering eventstore timer")?;
        registry
            .register(Box::new(store_db_errors.clone()))
            .context("registering event store errors")?;

        Ok(Self {
            registry,
            http_request_latency,
            http_responses,
            ingest_latency,
            ingest_requests,
            ingest_records,
            ingest_accept_errors,
            ingest_connections_active,
            store_method_time,
            store_db_errors,
        })
    }

    /// Records the latency of one HTTP request against its route label.
    pub fn http_latency(&self, path: &str, start: Instant) {
        self.http_request_latency
            .with_label_values(&[path])
            .observe(ms_since(start));
    }

    /// Counts one HTTP response against its route label and status code.
    pub fn http_status(&self, path: &str, code: u16) {
        self.http_responses
            .with_label_values(&[path, &code.to_string()])
            .inc();
    }

    /// Records the handling time of one ingestion connection.
    pub fn rsyslog_latency(&self, start: Instant) {
        self.ingest_requests.inc();
        self.ingest_latency.observe(ms_since(start));
    }

    /// Counts one ingested record by outcome label.
    pub fn rsyslog_record(&self, outcome: &str) {
        self.ingest_records.with_label_values(&[outcome]).inc();
    }

    /// Records the duration of one event store method call.
    pub fn store_method(&self, method: &str, start: Instant) {
        self.store_method_time
            .with_label_values(&[method])
            .observe(ms_since(start));
    }

    /// Counts one event store failure.
    pub fn store_error(&self, db_name: &str, operation: &str) {
        self.store_db_errors
            .with_label_values(&[db_name, operation])
            .inc();
    }

    /// Encodes every registered instrument in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }
}

/// Milliseconds elapsed since `start`.
pub fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Default Prometheus buckets scaled to milliseconds.
pub fn buckets() -> Vec<f64> {
    prometheus::DEFAULT_BUCKETS
        .iter()
        .map(|v| v * 1000.0)
        .collect()
}
