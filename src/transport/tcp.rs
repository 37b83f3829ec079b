//! TCP loopback transport.
//!
//! Bootstrap order matters: the listener is bound (ephemeral port) on the
//! calling thread before the node thread starts, the node accepts with a
//! running-flag-aware non-blocking loop, and the transceiver connects
//! during `init`. A driver that fails before connecting can therefore
//! never wedge the node join.

use crate::config::Configuration;
use crate::error::HarnessError;
use crate::sync::RunningFlag;
use crate::transport::stream::{
    echo_stream, pump_receive, pump_send, FrameReader, FrameWriter,
};
use crate::transport::{EchoNode, MessageTransceiver, Recorder};
use crossbeam::utils::Backoff;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use tracing::debug;

/// Bind a loopback listener and hand out the two halves of the pair.
pub fn loopback_pair() -> Result<(TcpDriverEnd, TcpAcceptor), HarnessError> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(HarnessError::init)?;
    listener.set_nonblocking(true).map_err(HarnessError::init)?;
    let addr = listener.local_addr().map_err(HarnessError::init)?;
    debug!(%addr, "tcp listener bound");
    Ok((TcpDriverEnd { addr }, TcpAcceptor { listener }))
}

/// Connection target for the driver side; the stream is established in
/// `init`.
pub struct TcpDriverEnd {
    addr: SocketAddr,
}

/// Listening half handed to the echo node.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Accept the driver's connection without blocking out the running
    /// flag. Returns `None` when the run is torn down before anyone
    /// connected.
    fn accept(&self, running: &RunningFlag) -> anyhow::Result<Option<TcpStream>> {
        let backoff = Backoff::new();
        loop {
            if !running.is_set() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "echo node accepted driver connection");
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => backoff.snooze(),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// TCP-backed [`MessageTransceiver`].
pub struct TcpTransceiver {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    reader: FrameReader,
    writer: FrameWriter,
    recorder: Recorder,
}

impl TcpTransceiver {
    pub fn new(end: TcpDriverEnd, recorder: Recorder) -> Self {
        TcpTransceiver {
            addr: end.addr,
            stream: None,
            reader: FrameReader::new(),
            writer: FrameWriter::new(),
            recorder,
        }
    }
}

impl MessageTransceiver for TcpTransceiver {
    fn init(&mut self, _config: &Configuration) -> Result<(), HarnessError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(self.addr).map_err(HarnessError::init)?;
        stream.set_nodelay(true).map_err(HarnessError::init)?;
        stream.set_nonblocking(true).map_err(HarnessError::init)?;
        debug!(addr = %self.addr, "tcp transceiver connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn send(
        &mut self,
        max_count: usize,
        length: usize,
        timestamp: i64,
        checksum: i64,
    ) -> Result<usize, HarnessError> {
        let writer = &mut self.writer;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HarnessError::transport(anyhow::anyhow!("transceiver not initialized")))?;
        pump_send(stream, writer, max_count, length, timestamp, checksum)
    }

    fn receive(&mut self) -> Result<(), HarnessError> {
        let reader = &mut self.reader;
        let writer = &mut self.writer;
        let recorder = &mut self.recorder;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HarnessError::transport(anyhow::anyhow!("transceiver not initialized")))?;
        pump_receive(stream, reader, writer, recorder)
    }

    fn destroy(&mut self) -> Result<(), HarnessError> {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone; a failed shutdown is not a fault.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("tcp transceiver destroyed");
        }
        Ok(())
    }
}

/// TCP-backed [`EchoNode`].
pub struct TcpEchoNode {
    acceptor: TcpAcceptor,
    running: RunningFlag,
}

impl TcpEchoNode {
    pub fn new(acceptor: TcpAcceptor, running: RunningFlag) -> Self {
        TcpEchoNode { acceptor, running }
    }
}

impl EchoNode for TcpEchoNode {
    fn run(&mut self) -> anyhow::Result<()> {
        match self.acceptor.accept(&self.running)? {
            Some(mut stream) => echo_stream(&mut stream, &self.running),
            None => Ok(()),
        }
    }
}
