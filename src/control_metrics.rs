//! Prometheus metrics for control actions

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics for control actions (reload, template cache clear, seed reset)
#[derive(Clone)]
pub struct ControlMetrics {
    registry: Registry,

    /// Total number of control requests by action
    pub control_requests_total: Arc<CounterVec>,

    /// Control requests by action and result (success/failure)
    pub control_requests_by_result: Arc<CounterVec>,

    /// Duration of control actions
    pub control_duration_seconds: Arc<HistogramVec>,

    /// Rejected control requests
    pub control_auth_failures_total: Arc<CounterVec>,
}

impl ControlMetrics {
    /// Create control metrics in a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(&Registry::new())
    }

    /// Create metrics registered with `registry`
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let control_requests_total = CounterVec::new(
            Opts::new(
                "service_router_control_requests_total",
                "Total number of control requests",
            ),
            &["action"], // action: reload, clear_templates, reset_etag
        )?;
        registry.register(Box::new(control_requests_total.clone()))?;

        let control_requests_by_result = CounterVec::new(
            Opts::new(
                "service_router_control_requests_by_result",
                "Total number of control requests by result",
            ),
            &["action", "result"],
        )?;
        registry.register(Box::new(control_requests_by_result.clone()))?;

        let control_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "service_router_control_duration_seconds",
                "Duration of control actions in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["action"],
        )?;
        registry.register(Box::new(control_duration_seconds.clone()))?;

        let control_auth_failures_total = CounterVec::new(
            Opts::new(
                "service_router_control_auth_failures_total",
                "Total number of rejected control requests",
            ),
            &["reason"], // reason: missing_key, invalid_key
        )?;
        registry.register(Box::new(control_auth_failures_total.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            control_requests_total: Arc::new(control_requests_total),
            control_requests_by_result: Arc::new(control_requests_by_result),
            control_duration_seconds: Arc::new(control_duration_seconds),
            control_auth_failures_total: Arc::new(control_auth_failures_total),
        })
    }

    pub fn record_request(&self, action: &str) {
        self.control_requests_total.with_label_values(&[action]).inc();
    }

    pub fn record_result(&self, action: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.control_requests_by_result
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn record_duration(&self, action: &str, duration_secs: f64) {
        self.control_duration_seconds
            .with_label_values(&[action])
            .observe(duration_secs);
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.control_auth_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Prometheus text exposition of every metric in the registry
    pub fn render_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
