//! Prometheus metrics for the config client: request latency, probe-cycle
//! outcomes, and active-listener counts.
//!
//! Each `MetricsMonitor` owns a private `Registry` rather than registering
//! into Prometheus's process-global default registry, so a process can hold
//! more than one client (and more than one set of tests can run in the same
//! binary) without a "duplicate metrics collector registration" panic.

use std::time::{Duration, Instant};

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};

pub struct MetricsMonitor {
    registry: Registry,

    /// Latency of `getConfig`/`publishConfig`/`removeConfig` calls.
    pub request_latency: HistogramVec,

    /// Number of keys currently subscribed with at least one listener.
    pub active_listener_count: GaugeVec,

    /// Long-polling probe cycle outcomes.
    pub probe_cycle_count: CounterVec,

    pub failed_request_count: CounterVec,
    pub success_request_count: CounterVec,
}

impl MetricsMonitor {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_latency = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "nacos_config_request_latency_seconds",
                "Request latency in seconds",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(request_latency.clone()))?;

        let active_listener_count = GaugeVec::new(
            Opts::new(
                "nacos_config_active_listener_count",
                "Number of config keys with at least one registered listener",
            ),
            &["data_id", "group", "tenant"],
        )?;
        registry.register(Box::new(active_listener_count.clone()))?;

        let probe_cycle_count = CounterVec::new(
            Opts::new(
                "nacos_config_probe_cycles_total",
                "Total number of long-polling probe cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(probe_cycle_count.clone()))?;

        let failed_request_count = CounterVec::new(
            Opts::new(
                "nacos_config_failed_requests_total",
                "Total number of failed requests",
            ),
            &["operation", "error_type"],
        )?;
        registry.register(Box::new(failed_request_count.clone()))?;

        let success_request_count = CounterVec::new(
            Opts::new(
                "nacos_config_success_requests_total",
                "Total number of successful requests",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(success_request_count.clone()))?;

        Ok(Self {
            registry,
            request_latency,
            active_listener_count,
            probe_cycle_count,
            failed_request_count,
            success_request_count,
        })
    }

    pub fn record_latency(&self, operation: &str, status: &str, duration: Duration) {
        self.request_latency
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn set_active_listener_count(&self, data_id: &str, group: &str, tenant: &str, count: u64) {
        self.active_listener_count
            .with_label_values(&[data_id, group, tenant])
            .set(count as f64);
    }

    pub fn record_probe_cycle(&self, outcome: &str) {
        self.probe_cycle_count.with_label_values(&[outcome]).inc();
    }

    pub fn increment_failed_request(&self, operation: &str, error_type: &str) {
        self.failed_request_count
            .with_label_values(&[operation, error_type])
            .inc();
    }

    pub fn increment_success_request(&self, operation: &str) {
        self.success_request_count
            .with_label_values(&[operation])
            .inc();
    }

    /// Render this monitor's metrics in Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap()
    }
}

impl Default for MetricsMonitor {
    fn default() -> Self {
        Self::new().expect("failed to create metrics monitor")
    }
}

/// Measures one operation's duration and records it against
/// `request_latency` plus the matching success/failure counter via an
/// explicit terminal call (`success`/`failure` consumes the timer).
pub struct Timer<'a> {
    metrics: &'a MetricsMonitor,
    operation: String,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn start(metrics: &'a MetricsMonitor, operation: &str) -> Self {
        Self {
            metrics,
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        let duration = self.start.elapsed();
        self.metrics
            .record_latency(&self.operation, "success", duration);
        self.metrics.increment_success_request(&self.operation);
    }

    pub fn failure(self, error_type: &str) {
        let duration = self.start.elapsed();
        self.metrics
            .record_latency(&self.operation, "error", duration);
        self.metrics
            .increment_failed_request(&self.operation, error_type);
    }
}
