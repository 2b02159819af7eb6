//! Lightweight metrics helpers for Dendrite.
//!
//! Convenience functions and RAII timers over the `metrics` crate macros. No
//! exporter is installed here; the embedding application may install any
//! compatible recorder. Without one, every call is a no-op.
//!
//! Provided metrics:
//! * `dendrite_requests_total` (counter, labels: method, status)
//! * `dendrite_request_duration_seconds` (histogram, labels: method)
//! * `dendrite_dispatch_total` (counter, labels: target, outcome)
//! * `dendrite_dispatch_duration_seconds` (histogram, labels: target)
//! * `dendrite_cache_hits_total` (counter)
//! * `dendrite_coalesced_total` (counter)
//! * `dendrite_in_flight` (gauge)
//! * `dendrite_gate_waiting` (gauge)
use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, Instant},
};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const DENDRITE_REQUESTS_TOTAL: &str = "dendrite_requests_total";
pub const DENDRITE_REQUEST_DURATION_SECONDS: &str = "dendrite_request_duration_seconds";
pub const DENDRITE_DISPATCH_TOTAL: &str = "dendrite_dispatch_total";
pub const DENDRITE_DISPATCH_DURATION_SECONDS: &str = "dendrite_dispatch_duration_seconds";
pub const DENDRITE_CACHE_HITS_TOTAL: &str = "dendrite_cache_hits_total";
pub const DENDRITE_COALESCED_TOTAL: &str = "dendrite_coalesced_total";
pub const DENDRITE_IN_FLIGHT: &str = "dendrite_in_flight";
pub const DENDRITE_GATE_WAITING: &str = "dendrite_gate_waiting";

/// Requests currently queued on the serialization gate.
static GATE_WAITING: Lazy<AtomicI64> = Lazy::new(|| {
    describe_counter!(
        DENDRITE_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests answered by the gateway."
    );
    describe_histogram!(
        DENDRITE_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests answered by the gateway."
    );
    describe_counter!(
        DENDRITE_DISPATCH_TOTAL,
        Unit::Count,
        "Downstream computations started by a leader, by outcome."
    );
    describe_histogram!(
        DENDRITE_DISPATCH_DURATION_SECONDS,
        Unit::Seconds,
        "Duration of downstream computations."
    );
    describe_counter!(
        DENDRITE_CACHE_HITS_TOTAL,
        Unit::Count,
        "Requests answered from the result cache."
    );
    describe_counter!(
        DENDRITE_COALESCED_TOTAL,
        Unit::Count,
        "Requests that joined an in-flight computation as followers."
    );
    describe_gauge!(DENDRITE_IN_FLIGHT, "Keys currently being computed.");
    describe_gauge!(
        DENDRITE_GATE_WAITING,
        "Requests waiting on the serialization gate."
    );

    AtomicI64::new(0)
});

/// Count an answered request.
pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        DENDRITE_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(method: &str, duration: Duration) {
    histogram!(DENDRITE_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Count a finished downstream computation. `outcome` is `ok` or a failure class.
pub fn increment_dispatch_total(target: &str, outcome: &'static str) {
    counter!(
        DENDRITE_DISPATCH_TOTAL,
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_dispatch_duration(target: &str, duration: Duration) {
    histogram!(DENDRITE_DISPATCH_DURATION_SECONDS, "target" => target.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_cache_hits() {
    counter!(DENDRITE_CACHE_HITS_TOTAL).increment(1);
}

pub fn increment_coalesced() {
    counter!(DENDRITE_COALESCED_TOTAL).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(DENDRITE_IN_FLIGHT).set(count as f64);
}

/// Adjust the gate queue gauge by `delta` and return the new depth.
pub fn adjust_gate_waiting(delta: i64) -> i64 {
    let depth = GATE_WAITING.fetch_add(delta, Ordering::Relaxed) + delta;
    gauge!(DENDRITE_GATE_WAITING).set(depth as f64);
    depth
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, self.start.elapsed());
    }
}

/// RAII helper measuring downstream computation duration.
pub struct DispatchTimer {
    start: Instant,
    target: String,
}

impl DispatchTimer {
    pub fn new(target: &str) -> Self {
        Self {
            start: Instant::now(),
            target: target.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        record_dispatch_duration(&self.target, self.start.elapsed());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&GATE_WAITING);
    tracing::debug!("Dendrite metric descriptions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_record_on_drop() {
        drop(RequestTimer::new("GET"));
        let timer = DispatchTimer::new("worker");
        assert!(timer.elapsed() < Duration::from_secs(5));
        drop(timer);
    }

    #[test]
    fn test_gate_gauge_counts_up() {
        assert!(adjust_gate_waiting(1) >= 1);
        adjust_gate_waiting(-1);
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
    }
}
