//! Metrics HTTP endpoint
//!
//! Serves router counters in Prometheus text format on a separate port,
//! followed by the control-action metrics when they are attached.

use crate::control_metrics::ControlMetrics;
use crate::metrics::{MetricsSnapshot, RouterMetrics};
use http::{header, HeaderValue};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<RouterMetrics>,
    control_metrics: Option<Arc<ControlMetrics>>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `metrics` - Shared metrics collector
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(metrics: Arc<RouterMetrics>, addr: SocketAddr) -> Self {
        Self {
            metrics,
            control_metrics: None,
            addr,
        }
    }

    /// Also expose control-action metrics
    pub fn with_control_metrics(mut self, control_metrics: Arc<ControlMetrics>) -> Self {
        self.control_metrics = Some(control_metrics);
        self
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = listener.local_addr()?;
        info!("Metrics endpoint listening on http://{}", addr);
        info!("Metrics available at http://{}/metrics", addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);
            let control_metrics = self.control_metrics.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    let control_metrics = control_metrics.clone();
                    async move { handle_request(req, metrics, control_metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<RouterMetrics>,
    control_metrics: Option<Arc<ControlMetrics>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match req.uri().path() {
        "/metrics" => Ok(metrics_response(&metrics, control_metrics.as_deref())),
        "/health" => Ok(text_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#.to_string(),
        )),
        _ => Ok(text_response(
            StatusCode::NOT_FOUND,
            "text/plain",
            "404 Not Found".to_string(),
        )),
    }
}

fn metrics_response(
    metrics: &RouterMetrics,
    control_metrics: Option<&ControlMetrics>,
) -> Response<Full<Bytes>> {
    let mut body = format_prometheus_metrics(&metrics.get_stats());
    if let Some(control_metrics) = control_metrics {
        match control_metrics.render_text() {
            Ok(text) => body.push_str(&text),
            Err(e) => warn!("Failed to encode control metrics: {}", e),
        }
    }
    text_response(
        StatusCode::OK,
        "text/plain; version=0.0.4; charset=utf-8",
        body,
    )
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const COUNTER: &str = "counter";
const GAUGE: &str = "gauge";

fn metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP service_router_{} {}", name, help);
    let _ = writeln!(output, "# TYPE service_router_{} {}", name, kind);
    let _ = writeln!(output, "service_router_{} {}", name, value);
    output.push('\n');
}

/// Format a snapshot in Prometheus exposition format
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let percent = |value: f64| format!("{:.2}", value);
    let metrics: [(&str, &str, &str, String); 19] = [
        // Routing
        (
            "requests_total",
            COUNTER,
            "Total number of requests received",
            snapshot.total_requests.to_string(),
        ),
        (
            "routed_requests_total",
            COUNTER,
            "Requests matched to a service",
            snapshot.routed_requests.to_string(),
        ),
        (
            "not_found_total",
            COUNTER,
            "Requests with no matching pattern",
            snapshot.not_found.to_string(),
        ),
        (
            "method_not_allowed_total",
            COUNTER,
            "Requests matching a pattern under another method",
            snapshot.method_not_allowed.to_string(),
        ),
        (
            "options_requests_total",
            COUNTER,
            "OPTIONS requests answered by the router",
            snapshot.options_requests.to_string(),
        ),
        (
            "control_requests_total",
            COUNTER,
            "Requests carrying control parameters",
            snapshot.control_requests.to_string(),
        ),
        // Responses
        (
            "cacheable_responses_total",
            COUNTER,
            "Responses sent with an ETag",
            snapshot.cacheable_responses.to_string(),
        ),
        (
            "not_modified_total",
            COUNTER,
            "Conditional requests answered with 304",
            snapshot.not_modified.to_string(),
        ),
        (
            "not_modified_rate",
            GAUGE,
            "Share of routed requests answered with 304, in percent",
            percent(snapshot.not_modified_rate()),
        ),
        (
            "redirects_total",
            COUNTER,
            "Responses redirected by a generator",
            snapshot.redirects.to_string(),
        ),
        (
            "fatal_responses_total",
            COUNTER,
            "Requests failed with 500 because of generator errors",
            snapshot.fatal_responses.to_string(),
        ),
        (
            "render_failures_total",
            COUNTER,
            "Responses answered with the fail-safe rendering",
            snapshot.render_failures.to_string(),
        ),
        (
            "compressed_responses_total",
            COUNTER,
            "Responses sent gzip encoded",
            snapshot.compressed_responses.to_string(),
        ),
        // Generators
        (
            "generator_invocations_total",
            COUNTER,
            "Total number of generator invocations",
            snapshot.generator_invocations.to_string(),
        ),
        (
            "generator_failures_total",
            COUNTER,
            "Generator invocations that failed",
            snapshot.generator_failures.to_string(),
        ),
        (
            "generator_failure_rate",
            GAUGE,
            "Generator failure rate percentage",
            percent(snapshot.generator_failure_rate()),
        ),
        (
            "bytes_to_client_total",
            COUNTER,
            "Total body bytes sent to clients",
            snapshot.bytes_to_client.to_string(),
        ),
        // Latency (milliseconds)
        (
            "request_duration_ms_avg",
            GAUGE,
            "Average request duration in milliseconds",
            percent(snapshot.avg_request_duration_ms()),
        ),
        (
            "generator_duration_ms_avg",
            GAUGE,
            "Average generator duration in milliseconds",
            percent(snapshot.avg_generator_duration_ms()),
        ),
    ];

    let mut output = String::new();
    for (name, kind, help, value) in &metrics {
        metric(&mut output, name, kind, help, value);
    }
    output
}
