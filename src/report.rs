//! Per-run measurement report.
//!
//! One [`RunReport`] per completed run: the paired timestamp sequences the
//! oracle verified, wall-clock elapsed time, and a round-trip latency
//! histogram recorded by the driver as echoes arrive. No cross-run
//! aggregation and no report files; callers print or inspect what they
//! need.

use crate::cli::TransportKind;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Outcome of one successful benchmark run.
#[derive(Clone)]
pub struct RunReport {
    transport: TransportKind,
    message_count: usize,
    message_length: usize,
    burst_size: usize,
    /// Logical timestamps in send order, one entry per message.
    pub sent_timestamps: Vec<i64>,
    /// Logical timestamps in receipt order; equals `sent_timestamps` for
    /// every run that returns `Ok`.
    pub received_timestamps: Vec<i64>,
    /// Wall-clock time from first send to last receipt.
    pub elapsed: Duration,
    latency: Histogram<u64>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: TransportKind,
        message_count: usize,
        message_length: usize,
        burst_size: usize,
        sent_timestamps: Vec<i64>,
        received_timestamps: Vec<i64>,
        elapsed: Duration,
        latency: Histogram<u64>,
    ) -> Self {
        RunReport {
            transport,
            message_count,
            message_length,
            burst_size,
            sent_timestamps,
            received_timestamps,
            elapsed,
            latency,
            finished_at: Utc::now(),
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn messages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.message_count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn megabytes_per_second(&self) -> f64 {
        self.messages_per_second() * self.message_length as f64 / 1_000_000.0
    }

    /// Round-trip latency percentiles in nanoseconds.
    pub fn latency(&self) -> LatencySummary {
        LatencySummary {
            min_ns: self.latency.min(),
            mean_ns: self.latency.mean(),
            p50_ns: self.latency.value_at_quantile(0.50),
            p95_ns: self.latency.value_at_quantile(0.95),
            p99_ns: self.latency.value_at_quantile(0.99),
            max_ns: self.latency.max(),
        }
    }

    /// Serializable one-run summary for the binary's output.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            transport: self.transport.to_string(),
            message_count: self.message_count,
            message_length: self.message_length,
            burst_size: self.burst_size,
            elapsed_ns: self.elapsed.as_nanos(),
            messages_per_second: self.messages_per_second(),
            megabytes_per_second: self.megabytes_per_second(),
            latency: self.latency(),
            finished_at: self.finished_at,
        }
    }
}

impl fmt::Debug for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunReport")
            .field("transport", &self.transport)
            .field("message_count", &self.message_count)
            .field("message_length", &self.message_length)
            .field("burst_size", &self.burst_size)
            .field("elapsed", &self.elapsed)
            .field("latency", &self.latency())
            .field("finished_at", &self.finished_at)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let latency = self.latency();
        write!(
            f,
            "{}: {} msgs x {} B (burst {}) in {:.3}s | {:.0} msg/s, {:.2} MB/s | rtt p50 {}ns p99 {}ns max {}ns",
            self.transport,
            self.message_count,
            self.message_length,
            self.burst_size,
            self.elapsed.as_secs_f64(),
            self.messages_per_second(),
            self.megabytes_per_second(),
            latency.p50_ns,
            latency.p99_ns,
            latency.max_ns,
        )
    }
}

/// Round-trip latency percentiles, all in nanoseconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySummary {
    pub min_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

/// Flat, serializable view of a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub transport: String,
    pub message_count: usize,
    pub message_length: usize,
    pub burst_size: usize,
    pub elapsed_ns: u128,
    pub messages_per_second: f64,
    pub megabytes_per_second: f64,
    pub latency: LatencySummary,
    pub finished_at: DateTime<Utc>,
}
