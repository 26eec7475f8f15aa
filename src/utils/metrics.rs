//! Observability and Metrics
//!
//! Counters describing what the broker has done since startup.
//!
//! Uses atomic counters so concurrent invocations can record without locking.

use crate::error::BrokerError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for brokered requests
#[derive(Debug)]
pub struct Metrics {
    /// Total requests received
    pub requests_total: AtomicU64,
    /// Requests whose error slot stayed empty
    pub requests_succeeded: AtomicU64,
    /// Requests answered with an error in the error slot
    pub requests_failed: AtomicU64,
    /// Rejected envelopes
    pub malformed_envelopes: AtomicU64,
    /// Unknown accounts or rejected tokens
    pub auth_failures: AtomicU64,
    /// Requests refused while building (url, method, header)
    pub rejected_requests: AtomicU64,
    /// Non-2xx upstream responses
    pub upstream_failures: AtomicU64,
    /// Upstream transport failures
    pub transport_failures: AtomicU64,
    /// Result envelopes that could not be serialized
    pub envelope_failures: AtomicU64,
    /// Result pipes currently being written
    pub pipes_active: AtomicU64,
    /// Total bytes pushed into result pipes, prefix included
    pub bytes_streamed: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            malformed_envelopes: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            envelope_failures: AtomicU64::new(0),
            pipes_active: AtomicU64::new(0),
            bytes_streamed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new request
    pub fn request_received(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that produced a result without error
    pub fn request_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that failed, bucketed by error kind
    pub fn request_failed(&self, error: &BrokerError) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);

        let bucket = match error {
            BrokerError::MalformedEnvelope(_) | BrokerError::Serialization(_) => {
                &self.malformed_envelopes
            }
            BrokerError::AccountNotFound(_) | BrokerError::InvalidToken => &self.auth_failures,
            BrokerError::InvalidRequestUrl(_)
            | BrokerError::UnsupportedMethod(_)
            | BrokerError::ReservedHeaderConflict(_) => &self.rejected_requests,
            BrokerError::HttpRequestFailed { .. } => &self.upstream_failures,
            BrokerError::TransportError(_) | BrokerError::Io(_) => &self.transport_failures,
            BrokerError::ConfigError(_) | BrokerError::PipeClosed => return,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a result envelope that could not be serialized
    pub fn envelope_failure(&self) {
        self.envelope_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a writer task starting
    pub fn pipe_opened(&self) {
        self.pipes_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a writer task finishing
    pub fn pipe_closed(&self, byte_count: u64) {
        self.pipes_active.fetch_sub(1, Ordering::Relaxed);
        self.bytes_streamed.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            malformed_envelopes: self.malformed_envelopes.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            envelope_failures: self.envelope_failures.load(Ordering::Relaxed),
            pipes_active: self.pipes_active.load(Ordering::Relaxed),
            bytes_streamed: self.bytes_streamed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            requests_total = snapshot.requests_total,
            requests_succeeded = snapshot.requests_succeeded,
            requests_failed = snapshot.requests_failed,
            malformed_envelopes = snapshot.malformed_envelopes,
            auth_failures = snapshot.auth_failures,
            rejected_requests = snapshot.rejected_requests,
            upstream_failures = snapshot.upstream_failures,
            transport_failures = snapshot.transport_failures,
            envelope_failures = snapshot.envelope_failures,
            pipes_active = snapshot.pipes_active,
            bytes_streamed = snapshot.bytes_streamed,
            uptime_seconds = snapshot.uptime_seconds,
            "Broker metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub malformed_envelopes: u64,
    pub auth_failures: u64,
    pub rejected_requests: u64,
    pub upstream_failures: u64,
    pub transport_failures: u64,
    pub envelope_failures: u64,
    pub pipes_active: u64,
    pub bytes_streamed: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
