//! Transport abstraction layer.
//!
//! The harness core is polymorphic over a transport through three
//! capabilities:
//!
//! - [`MessageTransceiver`]: the local participant driving sends and polling
//!   receives on the calling thread.
//! - [`EchoNode`]: the remote participant, run on its own thread, bouncing
//!   every inbound message back unchanged until the running flag clears.
//! - [`MessageRecorder`]: the callback invoked synchronously from within
//!   `receive()` once per received message.
//!
//! One concrete transceiver/node pair exists per [`TransportKind`], selected
//! via configuration; [`launch`] wires a pair to a benchmark and runs it.

use crate::cli::TransportKind;
use crate::config::Configuration;
use crate::error::HarnessError;
use crate::harness::EchoBenchmark;
use crate::report::RunReport;
use serde::{Deserialize, Serialize};

pub mod channel;
pub mod stream;
pub mod tcp;
#[cfg(unix)]
pub mod uds;

pub use channel::{ChannelEchoNode, ChannelMedium, ChannelTransceiver, NodeEnd};
pub use tcp::{TcpEchoNode, TcpTransceiver};
#[cfg(unix)]
pub use uds::{UdsEchoNode, UdsTransceiver};

/// The unit of traffic. `payload` carries `message_length` filler bytes;
/// `timestamp` and `checksum` are the correlation pair the oracle checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoMessage {
    pub timestamp: i64,
    pub checksum: i64,
    pub payload: Vec<u8>,
}

impl EchoMessage {
    pub fn new(timestamp: i64, checksum: i64, length: usize) -> Self {
        EchoMessage {
            timestamp,
            checksum,
            payload: vec![0u8; length],
        }
    }
}

/// Callback capability invoked once per received message. Implementations
/// must not block; the only failure they may report is a validation failure.
pub trait MessageRecorder {
    fn record(&mut self, timestamp: i64, checksum: i64) -> Result<(), HarnessError>;
}

impl<F> MessageRecorder for F
where
    F: FnMut(i64, i64) -> Result<(), HarnessError>,
{
    fn record(&mut self, timestamp: i64, checksum: i64) -> Result<(), HarnessError> {
        self(timestamp, checksum)
    }
}

/// Boxed recorder handed to transceiver factories by the harness.
pub type Recorder = Box<dyn MessageRecorder>;

/// The local participant driving traffic against the transport under test.
///
/// `send` and `receive` are non-blocking, poll-style operations; the only
/// suspension points of a run are the start-signal wait and the final node
/// join, both owned by the harness.
pub trait MessageTransceiver {
    /// Idempotent setup. Fails with [`HarnessError::Init`] on transport
    /// misconfiguration, aborting the run before traffic starts.
    fn init(&mut self, config: &Configuration) -> Result<(), HarnessError>;

    /// Attempt to send up to `max_count` messages of `length` bytes carrying
    /// the given correlation pair. Returns how many were accepted; zero
    /// under backpressure. Never blocks indefinitely.
    fn send(
        &mut self,
        max_count: usize,
        length: usize,
        timestamp: i64,
        checksum: i64,
    ) -> Result<usize, HarnessError>;

    /// Non-blocking poll. Invokes the recorder zero or more times, once per
    /// message drained from the transport.
    fn receive(&mut self) -> Result<(), HarnessError>;

    /// Release all resources. Called exactly once per run, on success and
    /// failure paths alike.
    fn destroy(&mut self) -> Result<(), HarnessError>;
}

/// The remote participant. `run` loops reading inbound messages and writing
/// them back unchanged until the running flag clears, then returns; no
/// message is left half-processed. The node value is owned by its thread
/// and dropped on every exit path, so `Drop` is the resource release point.
pub trait EchoNode: Send {
    fn run(&mut self) -> anyhow::Result<()>;
}

/// Bind a concrete transceiver/node pair for the benchmark's configured
/// transport and execute the run.
pub fn launch(bench: &EchoBenchmark) -> Result<RunReport, HarnessError> {
    let config = bench.config().clone();
    match config.transport() {
        TransportKind::Channel => {
            let (driver, node) = ChannelMedium::bounded(config.burst_size());
            bench.run(
                move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
                move |running| Ok(ChannelEchoNode::new(node, running)),
            )
        }
        TransportKind::Tcp => {
            let (driver, acceptor) = tcp::loopback_pair()?;
            bench.run(
                move |recorder| Ok(TcpTransceiver::new(driver, recorder)),
                move |running| Ok(TcpEchoNode::new(acceptor, running)),
            )
        }
        #[cfg(unix)]
        TransportKind::UnixDomainSocket => {
            let (driver, acceptor) = uds::socket_pair(&config)?;
            bench.run(
                move |recorder| Ok(UdsTransceiver::new(driver, recorder)),
                move |running| Ok(UdsEchoNode::new(acceptor, running)),
            )
        }
        // The builder rejects unexpanded 'all' configurations.
        TransportKind::All => Err(HarnessError::init(anyhow::anyhow!(
            "'all' is not a concrete transport"
        ))),
    }
}
