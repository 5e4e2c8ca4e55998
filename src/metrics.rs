//! Metrics collection for the service router
//!
//! Thread-safe counters built on atomics. They track routing outcomes,
//! conditional-request hits, generator invocations and latencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the service router
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    // Routing statistics
    total_requests: AtomicU64,
    routed_requests: AtomicU64,
    not_found: AtomicU64,
    method_not_allowed: AtomicU64,
    options_requests: AtomicU64,
    control_requests: AtomicU64,

    // Response statistics
    cacheable_responses: AtomicU64,
    not_modified: AtomicU64,
    redirects: AtomicU64,
    fatal_responses: AtomicU64,
    render_failures: AtomicU64,
    compressed_responses: AtomicU64,

    // Generator statistics
    generator_invocations: AtomicU64,
    generator_failures: AtomicU64,

    // Byte statistics
    bytes_to_client: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,
    total_generator_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    // Routing statistics
    pub total_requests: u64,
    pub routed_requests: u64,
    pub not_found: u64,
    pub method_not_allowed: u64,
    pub options_requests: u64,
    pub control_requests: u64,

    // Response statistics
    pub cacheable_responses: u64,
    pub not_modified: u64,
    pub redirects: u64,
    pub fatal_responses: u64,
    pub render_failures: u64,
    pub compressed_responses: u64,

    // Generator statistics
    pub generator_invocations: u64,
    pub generator_failures: u64,

    // Byte statistics
    pub bytes_to_client: u64,

    // Latency statistics
    pub total_request_duration_us: u64,
    pub total_generator_duration_us: u64,
}

/// How the registry answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    Routed,
    NotFound,
    MethodNotAllowed,
    Options,
    /// Answered by the control handler without routing
    Control,
}

impl RouterMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incoming request and how it was routed
    pub fn record_request(&self, outcome: RoutingOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RoutingOutcome::Routed => &self.routed_requests,
            RoutingOutcome::NotFound => &self.not_found,
            RoutingOutcome::MethodNotAllowed => &self.method_not_allowed,
            RoutingOutcome::Options => &self.options_requests,
            RoutingOutcome::Control => &self.control_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the generators of one dispatched request
    ///
    /// # Arguments
    /// * `invocations` - Number of generators invoked
    /// * `failures` - Number of generators that failed
    /// * `duration` - Time spent in generators
    pub fn record_generators(&self, invocations: u64, failures: u64, duration: Duration) {
        self.generator_invocations
            .fetch_add(invocations, Ordering::Relaxed);
        self.generator_failures.fetch_add(failures, Ordering::Relaxed);
        self.total_generator_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cacheable(&self) {
        self.cacheable_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a 304 answer
    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hard 500 caused by generator failures
    pub fn record_fatal(&self) {
        self.fatal_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a renderer failure answered with the fail-safe body
    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compressed(&self) {
        self.compressed_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes sent to client
    pub fn record_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record request duration
    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// The snapshot may not be perfectly consistent across fields while
    /// requests are in flight.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            routed_requests: self.routed_requests.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            method_not_allowed: self.method_not_allowed.load(Ordering::Relaxed),
            options_requests: self.options_requests.load(Ordering::Relaxed),
            control_requests: self.control_requests.load(Ordering::Relaxed),
            cacheable_responses: self.cacheable_responses.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            fatal_responses: self.fatal_responses.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            compressed_responses: self.compressed_responses.load(Ordering::Relaxed),
            generator_invocations: self.generator_invocations.load(Ordering::Relaxed),
            generator_failures: self.generator_failures.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            total_generator_duration_us: self
                .total_generator_duration_us
                .load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.routed_requests,
            &self.not_found,
            &self.method_not_allowed,
            &self.options_requests,
            &self.control_requests,
            &self.cacheable_responses,
            &self.not_modified,
            &self.redirects,
            &self.fatal_responses,
            &self.render_failures,
            &self.compressed_responses,
            &self.generator_invocations,
            &self.generator_failures,
            &self.bytes_to_client,
            &self.total_request_duration_us,
            &self.total_generator_duration_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl MetricsSnapshot {
    /// Share of routed requests answered with 304, as a percentage
    pub fn not_modified_rate(&self) -> f64 {
        if self.routed_requests == 0 {
            0.0
        } else {
            (self.not_modified as f64 / self.routed_requests as f64) * 100.0
        }
    }

    /// Calculate average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Calculate average generator duration in milliseconds
    pub fn avg_generator_duration_ms(&self) -> f64 {
        if self.generator_invocations == 0 {
            0.0
        } else {
            (self.total_generator_duration_us as f64 / self.generator_invocations as f64) / 1000.0
        }
    }

    /// Generator failure rate as a percentage (0.0 to 100.0)
    pub fn generator_failure_rate(&self) -> f64 {
        if self.generator_invocations == 0 {
            0.0
        } else {
            (self.generator_failures as f64 / self.generator_invocations as f64) * 100.0
        }
    }
}
