//! # Echo Harness
//!
//! A reusable benchmark harness that measures throughput and round-trip
//! latency of a pluggable messaging transport. A run drives a fixed volume
//! of fixed-size messages through a transport-under-test, bounces them off
//! a remote echoing participant, and verifies that every message sent came
//! back intact and in order, while timing the exchange.
//!
//! ## Architecture Overview
//!
//! Two threads per run: the driver (the calling thread) sends bursts and
//! polls receives; the echo node runs on a dedicated thread and bounces
//! each inbound message back unchanged. Messages within one burst share a
//! logical timestamp; the checksum is the negation of that timestamp, so
//! the receiver can validate integrity without a side channel. At the end
//! of a run the received timestamp sequence must equal the sent sequence
//! exactly.
//!
//! Modules:
//!
//! - `harness`: the core orchestration loop, synchronization, and the
//!   correctness oracle
//! - `transport`: the transceiver/node/recorder capability contracts and
//!   the concrete channel, TCP, and Unix-socket transports
//! - `config`: the immutable run configuration and its validating builder
//! - `report`: per-run throughput and latency measurements
//! - `sync`: the cross-thread cells (start signal, running flag, error
//!   cell, cancel token)
//! - `cli`: command-line parsing for the `echo-harness` binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use echo_harness::{Configuration, EchoBenchmark, TransportKind};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::builder()
//!         .number_of_messages(10_000)
//!         .message_length(32)
//!         .burst_size(10)
//!         .transport(TransportKind::Channel)
//!         .build()?;
//!
//!     let bench = EchoBenchmark::new(config);
//!     let report = echo_harness::transport::launch(&bench)?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod harness;
pub mod report;
pub mod sync;
pub mod transport;

pub use cli::{Args, TransportKind};
pub use config::{Configuration, ConfigurationBuilder};
pub use error::HarnessError;
pub use harness::{EchoBenchmark, INITIAL_TIMESTAMP};
pub use report::{LatencySummary, RunReport, RunSummary};
pub use sync::{CancelToken, RunningFlag};
pub use transport::{launch, EchoMessage, EchoNode, MessageRecorder, MessageTransceiver, Recorder};

/// Crate version, used by the binary's `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values.
pub mod defaults {
    /// Default number of messages per run. Enough for a stable throughput
    /// figure while keeping a run short.
    pub const MESSAGE_COUNT: usize = 10_000;

    /// Default payload size in bytes. Small messages keep the focus on
    /// per-message overhead rather than copy bandwidth.
    pub const MESSAGE_LENGTH: usize = 32;

    /// Default burst size. One message per logical timestamp unless the
    /// caller opts into coarser pacing.
    pub const BURST_SIZE: usize = 1;

    /// Default prefix for files a run creates under its output directory.
    pub const OUTPUT_PREFIX: &str = "echo";
}
