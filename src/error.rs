//! Error taxonomy for the harness.
//!
//! Every failure a run can produce is one of these variants. The harness
//! never retries: any detected fault aborts the run after best-effort
//! teardown (flag flip, node join, transceiver destroy), so resources are
//! released even on the failure paths.

use thiserror::Error;

/// Errors surfaced by a benchmark run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The transceiver failed to initialize (transport misconfiguration).
    /// Fatal; aborts the run before any traffic starts.
    #[error("transceiver initialization failed: {0}")]
    Init(#[source] anyhow::Error),

    /// A received checksum does not match the negation of its timestamp.
    /// Fatal; surfaced immediately from within `receive()`.
    #[error("checksum {checksum} does not correlate with timestamp {timestamp}")]
    Validation { timestamp: i64, checksum: i64 },

    /// The echo node's loop raised an error. Captured first-wins in the
    /// shared error cell and propagated on the driver thread.
    #[error("echo node failed: {0}")]
    Node(#[source] anyhow::Error),

    /// External cancellation observed by the driver loop. A fatal abort,
    /// not a graceful stop.
    #[error("benchmark run cancelled")]
    Cancelled,

    /// Post-run oracle failure: the received timestamp sequence does not
    /// equal the sent sequence.
    #[error("sent/received sequences diverge: {sent_len} sent, {received_len} received")]
    SequenceMismatch {
        sent_len: usize,
        received_len: usize,
        first_divergence: Option<usize>,
    },

    /// A transport-level fault after initialization (peer gone, frame
    /// decode failure, oversized frame).
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// An I/O fault from the underlying medium or thread spawn.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Shorthand used by transports to wrap setup failures.
    pub fn init(err: impl Into<anyhow::Error>) -> Self {
        HarnessError::Init(err.into())
    }

    /// Shorthand used by transports for post-init faults.
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        HarnessError::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_both_sides() {
        let err = HarnessError::Validation {
            timestamp: 1000,
            checksum: 7,
        };
        let text = err.to_string();
        assert!(text.contains("1000"));
        assert!(text.contains('7'));
    }

    #[test]
    fn sequence_mismatch_reports_lengths() {
        let err = HarnessError::SequenceMismatch {
            sent_len: 10,
            received_len: 7,
            first_divergence: None,
        };
        let text = err.to_string();
        assert!(text.contains("10 sent"));
        assert!(text.contains("7 received"));
    }
}
