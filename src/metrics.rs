//! Metrics instrumentation for docker-dns.
//!
//! All metrics are prefixed with `docker_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::runtime::LifecycleAction;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::NoData => "nodata",
        QueryResult::Deferred => "deferred",
    };

    counter!("docker_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("docker_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Query returned records.
    Answered,
    /// Name known, no records of the requested type.
    NoData,
    /// Passed on to the next handler.
    Deferred,
}

/// Record the outcome of a resync pass.
pub fn record_resync(outcome: ResyncOutcome, duration: Duration) {
    let outcome_str = match outcome {
        ResyncOutcome::Applied => "applied",
        ResyncOutcome::ListFailed => "list_failed",
        ResyncOutcome::Cancelled => "cancelled",
    };

    counter!("docker_dns.resync.count", "outcome" => outcome_str).increment(1);
    histogram!("docker_dns.resync.duration.seconds").record(duration.as_secs_f64());
}

/// Resync outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// A new snapshot was installed.
    Applied,
    /// Listing containers failed; the previous snapshot stays.
    ListFailed,
    /// Shutdown interrupted the pass.
    Cancelled,
}

/// Record a container left out of a derivation pass.
pub fn record_container_skipped(reason: SkipReason) {
    counter!("docker_dns.derive.skipped.count", "reason" => reason.as_str()).increment(1);
}

/// Why a container produced no records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Inspection failed.
    InspectFailed,
    /// Its network scope is not in the allow-list.
    NetworkNotAllowed,
    /// It is not attached to its selected network.
    NotAttached,
    /// Its address on that network is empty or unparseable.
    InvalidAddress,
}

impl SkipReason {
    /// Label value used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InspectFailed => "inspect_failed",
            SkipReason::NetworkNotAllowed => "network_not_allowed",
            SkipReason::NotAttached => "not_attached",
            SkipReason::InvalidAddress => "invalid_address",
        }
    }
}

/// Record a container lifecycle event received from the runtime.
pub fn record_lifecycle_event(action: LifecycleAction) {
    counter!("docker_dns.events.count", "action" => action.as_str()).increment(1);
}

/// Record an event subscription (re)connect attempt.
pub fn record_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::InitialConnect => "initial_connect",
        ReconnectReason::StreamError => "stream_error",
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::SubscribeFailed => "subscribe_failed",
    };

    counter!("docker_dns.subscription.reconnect.count", "reason" => reason_str).increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// First connection to the runtime.
    InitialConnect,
    /// The event stream yielded an error.
    StreamError,
    /// The event stream ended.
    StreamEnded,
    /// Opening the event stream failed.
    SubscribeFailed,
}

/// Record the delay before the next reconnect attempt.
pub fn record_backoff(delay: Duration) {
    gauge!("docker_dns.subscription.backoff.seconds").set(delay.as_secs_f64());
}

/// Record table sizes of the current snapshot.
pub fn record_state_counts(addresses: usize, services: usize) {
    gauge!("docker_dns.state.addresses.count").set(addresses as f64);
    gauge!("docker_dns.state.services.count").set(services as f64);
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("docker_dns.state.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record the SOA serial number.
pub fn record_serial(serial: u32) {
    gauge!("docker_dns.state.serial").set(serial as f64);
}

/// Record records returned for an answered lookup.
pub fn record_answers_returned(count: usize) {
    histogram!("docker_dns.query.answers_returned").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
