//! In-process transport over bounded crossbeam channels.
//!
//! The medium is a pair of bounded channels, one per direction. The bound
//! is the in-flight capacity: once it fills, `send` reports partial
//! acceptance and the burst loop interleaves `receive` to drain echoes,
//! which is exactly the backpressure path the harness must tolerate.

use crate::config::Configuration;
use crate::error::HarnessError;
use crate::sync::RunningFlag;
use crate::transport::{EchoMessage, EchoNode, MessageTransceiver, Recorder};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use crossbeam::utils::Backoff;
use tracing::debug;

/// Factory for a connected driver/node endpoint pair.
pub struct ChannelMedium;

impl ChannelMedium {
    /// Create a medium with the given per-direction in-flight capacity.
    pub fn bounded(capacity: usize) -> (DriverEnd, NodeEnd) {
        let capacity = capacity.max(1);
        let (to_node_tx, to_node_rx) = bounded(capacity);
        let (to_driver_tx, to_driver_rx) = bounded(capacity);
        (
            DriverEnd {
                tx: to_node_tx,
                rx: to_driver_rx,
            },
            NodeEnd {
                rx: to_node_rx,
                tx: to_driver_tx,
            },
        )
    }
}

/// Driver-side endpoint: outbound to the node, inbound echoes back.
pub struct DriverEnd {
    tx: Sender<EchoMessage>,
    rx: Receiver<EchoMessage>,
}

/// Node-side endpoint. Public so tests can build custom (e.g. faulty) echo
/// nodes against the same medium.
pub struct NodeEnd {
    rx: Receiver<EchoMessage>,
    tx: Sender<EchoMessage>,
}

impl NodeEnd {
    /// Non-blocking poll for the next inbound message. Returns `None` when
    /// the channel is empty or the driver end is gone.
    pub fn poll(&self) -> Option<EchoMessage> {
        self.rx.try_recv().ok()
    }

    /// True once the driver end has been dropped and the inbound channel
    /// is drained.
    pub fn is_disconnected(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Bounce a message back to the driver. Returns `false` when the
    /// return channel is full or the driver end is gone.
    pub fn echo(&self, message: EchoMessage) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

/// Channel-backed [`MessageTransceiver`].
pub struct ChannelTransceiver {
    end: DriverEnd,
    recorder: Recorder,
    destroyed: bool,
}

impl ChannelTransceiver {
    pub fn new(end: DriverEnd, recorder: Recorder) -> Self {
        ChannelTransceiver {
            end,
            recorder,
            destroyed: false,
        }
    }
}

impl MessageTransceiver for ChannelTransceiver {
    fn init(&mut self, config: &Configuration) -> Result<(), HarnessError> {
        debug!(
            transport = %config.transport(),
            capacity = self.end.tx.capacity().unwrap_or_default(),
            "channel transceiver ready"
        );
        Ok(())
    }

    fn send(
        &mut self,
        max_count: usize,
        length: usize,
        timestamp: i64,
        checksum: i64,
    ) -> Result<usize, HarnessError> {
        let mut accepted = 0;
        while accepted < max_count {
            let message = EchoMessage::new(timestamp, checksum, length);
            match self.end.tx.try_send(message) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Disconnected(_)) => {
                    return Err(HarnessError::transport(anyhow::anyhow!(
                        "echo node end disconnected"
                    )));
                }
            }
        }
        Ok(accepted)
    }

    fn receive(&mut self) -> Result<(), HarnessError> {
        loop {
            match self.end.rx.try_recv() {
                Ok(message) => {
                    self.recorder.record(message.timestamp, message.checksum)?;
                }
                Err(TryRecvError::Empty) => return Ok(()),
                // Node gone; remaining echoes were drained above. The run
                // error cell carries the node-side cause if there was one.
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn destroy(&mut self) -> Result<(), HarnessError> {
        if !self.destroyed {
            self.destroyed = true;
            debug!("channel transceiver destroyed");
        }
        Ok(())
    }
}

/// Channel-backed [`EchoNode`]: bounce every inbound message back unchanged
/// until the running flag clears.
pub struct ChannelEchoNode {
    end: NodeEnd,
    running: RunningFlag,
}

impl ChannelEchoNode {
    pub fn new(end: NodeEnd, running: RunningFlag) -> Self {
        ChannelEchoNode { end, running }
    }
}

impl EchoNode for ChannelEchoNode {
    fn run(&mut self) -> anyhow::Result<()> {
        let backoff = Backoff::new();
        while self.running.is_set() {
            match self.end.rx.try_recv() {
                Ok(message) => {
                    backoff.reset();
                    // The return channel can be full while the driver is
                    // mid-burst; retry until it drains or the run ends.
                    let mut pending = message;
                    loop {
                        match self.end.tx.try_send(pending) {
                            Ok(()) => break,
                            Err(TrySendError::Full(back)) => {
                                if !self.running.is_set() {
                                    return Ok(());
                                }
                                pending = back;
                                backoff.snooze();
                            }
                            Err(TrySendError::Disconnected(_)) => return Ok(()),
                        }
                    }
                }
                Err(TryRecvError::Empty) => backoff.snooze(),
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
        Ok(())
    }
}
