//! Thread-safe dispatch statistics
//!
//! Atomic counters for the dispatch pipeline plus a bounded window of
//! handler latencies. Each [`crate::client::MessagingClient`] owns one
//! instance; there is no process-wide collector.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Dispatch counters shared between the pipeline lanes
#[derive(Debug)]
pub struct DispatchStats {
    received: AtomicU64,
    unmatched: AtomicU64,
    decode_failures: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
    handler_panics: AtomicU64,
    handler_timeouts: AtomicU64,
    acknowledged: AtomicU64,
    ack_withheld: AtomicU64,
    dropped_after_redelivery: AtomicU64,
    started_at: u64,
    // milliseconds
    handler_latencies: Mutex<Vec<u64>>,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            handler_timeouts: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            ack_withheld: AtomicU64::new(0),
            dropped_after_redelivery: AtomicU64::new(0),
            started_at: current_timestamp(),
            handler_latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn message_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unmatched_topic(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_succeeded(&self, duration: Duration) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    pub fn handler_failed(&self, duration: Duration) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    /// Panics also count as handler failures
    pub fn handler_panicked(&self, duration: Duration) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
        self.handler_failed(duration);
    }

    /// Timeouts also count as handler failures
    pub fn handler_timed_out(&self, duration: Duration) {
        self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
        self.handler_failed(duration);
    }

    pub fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_withheld(&self) {
        self.ack_withheld.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_after_redelivery(&self) {
        self.dropped_after_redelivery.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, duration: Duration) {
        if let Ok(mut samples) = self.handler_latencies.lock() {
            samples.push(duration.as_millis() as u64);

            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    fn latency_percentiles(&self) -> (f64, f64, f64) {
        let mut samples = match self.handler_latencies.lock() {
            Ok(samples) => samples.clone(),
            Err(_) => return (0.0, 0.0, 0.0),
        };
        samples.sort_unstable();
        (
            percentile(&samples, 50.0),
            percentile(&samples, 95.0),
            percentile(&samples, 99.0),
        )
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> DispatchSnapshot {
        let (p50, p95, p99) = self.latency_percentiles();
        DispatchSnapshot {
            timestamp: current_timestamp(),
            uptime_seconds: current_timestamp().saturating_sub(self.started_at),
            received: self.received.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ack_withheld: self.ack_withheld.load(Ordering::Relaxed),
            dropped_after_redelivery: self.dropped_after_redelivery.load(Ordering::Relaxed),
            handler_latency_p50_ms: p50,
            handler_latency_p95_ms: p95,
            handler_latency_p99_ms: p99,
        }
    }
}

/// Serializable view of [`DispatchStats`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DispatchSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub received: u64,
    pub unmatched: u64,
    pub decode_failures: u64,
    pub handled: u64,
    pub handler_failures: u64,
    pub handler_panics: u64,
    pub handler_timeouts: u64,
    pub acknowledged: u64,
    pub ack_withheld: u64,
    pub dropped_after_redelivery: u64,
    pub handler_latency_p50_ms: f64,
    pub handler_latency_p95_ms: f64,
    pub handler_latency_p99_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Nearest-rank percentile over sorted data
fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let rank = (percentile / 100.0 * sorted_data.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted_data.len()) - 1;
    sorted_data[index] as f64
}
