//! Unix domain socket transport.
//!
//! Mirrors the TCP pair but binds a socket file under the configured
//! output directory, named from the output prefix. Stale socket files from
//! a crashed run are unlinked before bind, and the acceptor unlinks the
//! path again on drop.

use crate::config::Configuration;
use crate::error::HarnessError;
use crate::sync::RunningFlag;
use crate::transport::stream::{
    echo_stream, pump_receive, pump_send, FrameReader, FrameWriter,
};
use crate::transport::{EchoNode, MessageTransceiver, Recorder};
use crossbeam::utils::Backoff;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use tracing::debug;

/// Bind the socket file and hand out the two halves of the pair.
pub fn socket_pair(config: &Configuration) -> Result<(UdsDriverEnd, UdsAcceptor), HarnessError> {
    let path = config
        .output_directory()
        .join(format!("{}.sock", config.output_prefix()));
    if path.exists() {
        std::fs::remove_file(&path).map_err(HarnessError::init)?;
    }
    let listener = UnixListener::bind(&path).map_err(HarnessError::init)?;
    listener.set_nonblocking(true).map_err(HarnessError::init)?;
    debug!(path = %path.display(), "unix socket bound");
    Ok((
        UdsDriverEnd { path: path.clone() },
        UdsAcceptor { listener, path },
    ))
}

/// Connection target for the driver side; the stream is established in
/// `init`.
pub struct UdsDriverEnd {
    path: PathBuf,
}

/// Listening half handed to the echo node. Owns the socket file.
pub struct UdsAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

impl UdsAcceptor {
    fn accept(&self, running: &RunningFlag) -> anyhow::Result<Option<UnixStream>> {
        let backoff = Backoff::new();
        loop {
            if !running.is_set() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    debug!("echo node accepted driver connection");
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

impl Drop for UdsAcceptor {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Unix-socket-backed [`MessageTransceiver`].
pub struct UdsTransceiver {
    path: PathBuf,
    stream: Option<UnixStream>,
    reader: FrameReader,
    writer: FrameWriter,
    recorder: Recorder,
}

impl UdsTransceiver {
    pub fn new(end: UdsDriverEnd, recorder: Recorder) -> Self {
        UdsTransceiver {
            path: end.path,
            stream: None,
            reader: FrameReader::new(),
            writer: FrameWriter::new(),
            recorder,
        }
    }
}

impl MessageTransceiver for UdsTransceiver {
    fn init(&mut self, _config: &Configuration) -> Result<(), HarnessError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path).map_err(HarnessError::init)?;
        stream.set_nonblocking(true).map_err(HarnessError::init)?;
        debug!(path = %self.path.display(), "unix socket transceiver connected");
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
            let _ = stream.shutdown(Shutdown::Both);
            debug!("unix socket transceiver destroyed");
        }
        Ok(())
    }
}

/// Unix-socket-backed [`EchoNode`].
pub struct UdsEchoNode {
    acceptor: UdsAcceptor,
    running: RunningFlag,
}

impl UdsEchoNode {
    pub fn new(acceptor: UdsAcceptor, running: RunningFlag) -> Self {
        UdsEchoNode { acceptor, running }
    }
}

impl EchoNode for UdsEchoNode {
    fn run(&mut self) -> anyhow::Result<()> {
        match self.acceptor.accept(&self.running)? {
            Some(mut stream) => echo_stream(&mut stream, &self.running),
            None => Ok(()),
        }
    }
}
