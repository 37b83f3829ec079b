//! Length-prefixed frame codec for byte-stream transports.
//!
//! Frames are a u32 little-endian body length followed by a bincode-encoded
//! [`EchoMessage`]. The reader and writer both tolerate non-blocking
//! streams: reads accumulate partial frames, writes park unsent bytes and
//! retry on the next pump. The echo node never decodes bodies; it writes
//! the raw frames back, so messages bounce bit-identically.

use crate::error::HarnessError;
use crate::sync::RunningFlag;
use crate::transport::{EchoMessage, Recorder};
use anyhow::anyhow;
use crossbeam::utils::Backoff;
use std::io::{ErrorKind, Read, Write};

/// Guard against corrupt length prefixes.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const READ_CHUNK: usize = 8192;

pub(crate) fn encode_frame(message: &EchoMessage) -> Result<Vec<u8>, HarnessError> {
    let body = bincode::serialize(message).map_err(HarnessError::transport)?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub(crate) fn decode_body(body: &[u8]) -> Result<EchoMessage, HarnessError> {
    bincode::deserialize(body).map_err(HarnessError::transport)
}

/// Accumulates bytes from a non-blocking reader and yields complete frame
/// bodies.
pub(crate) struct FrameReader {
    buf: Vec<u8>,
    peer_closed: bool,
}

impl FrameReader {
    pub(crate) fn new() -> Self {
        FrameReader {
            buf: Vec::new(),
            peer_closed: false,
        }
    }

    /// Pull whatever the stream has ready. Returns true if any bytes
    /// arrived.
    pub(crate) fn fill_from(&mut self, stream: &mut impl Read) -> std::io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut progressed = false;
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(progressed);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(progressed),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// True once the peer has shut down its write side and no more bytes
    /// will arrive.
    pub(crate) fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Pop the next complete frame body, if one is buffered.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Vec<u8>>, HarnessError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(HarnessError::transport(anyhow!(
                "frame too large: {body_len} bytes"
            )));
        }
        if self.buf.len() < LEN_PREFIX + body_len {
            return Ok(None);
        }
        let body = self.buf[LEN_PREFIX..LEN_PREFIX + body_len].to_vec();
        self.buf.drain(..LEN_PREFIX + body_len);
        Ok(Some(body))
    }
}

/// Buffers outbound frames and flushes them opportunistically into a
/// non-blocking writer.
pub(crate) struct FrameWriter {
    pending: Vec<u8>,
}

impl FrameWriter {
    pub(crate) fn new() -> Self {
        FrameWriter { pending: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a pre-encoded frame for transmission.
    pub(crate) fn enqueue_frame(&mut self, frame: &[u8]) {
        self.pending.extend_from_slice(frame);
    }

    /// Queue a raw body, adding the length prefix (echo passthrough path).
    pub(crate) fn enqueue_body(&mut self, body: &[u8]) {
        self.pending
            .extend_from_slice(&(body.len() as u32).to_le_bytes());
        self.pending.extend_from_slice(body);
    }

    /// Write as much pending data as the stream accepts. Returns true when
    /// the queue drained completely.
    pub(crate) fn flush_into(&mut self, stream: &mut impl Write) -> std::io::Result<bool> {
        let mut written = 0;
        while written < self.pending.len() {
            match stream.write(&self.pending[written..]) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "stream accepted zero bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.pending.drain(..written);
        Ok(self.pending.is_empty())
    }
}

/// Shared send path for stream transceivers: flush backlog first, then
/// accept messages until the kernel pushes back. A message counts as
/// accepted once its frame is fully queued.
pub(crate) fn pump_send(
    stream: &mut (impl Read + Write),
    writer: &mut FrameWriter,
    max_count: usize,
    length: usize,
    timestamp: i64,
    checksum: i64,
) -> Result<usize, HarnessError> {
    writer.flush_into(stream)?;
    if !writer.is_empty() {
        return Ok(0);
    }
    // All messages in a burst are identical; encode once.
    let frame = encode_frame(&EchoMessage::new(timestamp, checksum, length))?;
    let mut accepted = 0;
    while accepted < max_count {
        writer.enqueue_frame(&frame);
        accepted += 1;
        if !writer.flush_into(stream)? {
            break;
        }
    }
    Ok(accepted)
}

/// Shared receive path for stream transceivers: flush any backlog, read
/// what is available, and hand complete messages to the recorder.
pub(crate) fn pump_receive(
    stream: &mut (impl Read + Write),
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    recorder: &mut Recorder,
) -> Result<(), HarnessError> {
    writer.flush_into(stream)?;
    reader.fill_from(stream)?;
    while let Some(body) = reader.next_frame()? {
        let message = decode_body(&body)?;
        recorder.record(message.timestamp, message.checksum)?;
    }
    Ok(())
}

/// Echo loop shared by the stream-based nodes: read frames, write them back
/// unchanged, until the running flag clears or the peer disconnects.
pub(crate) fn echo_stream(
    stream: &mut (impl Read + Write),
    running: &RunningFlag,
) -> anyhow::Result<()> {
    let mut reader = FrameReader::new();
    let mut writer = FrameWriter::new();
    let backoff = Backoff::new();

    while running.is_set() {
        let mut progressed = reader.fill_from(stream)?;
        while let Some(body) = reader.next_frame()? {
            writer.enqueue_body(&body);
            progressed = true;
        }
        if !writer.is_empty() {
            writer.flush_into(stream)?;
        }
        if reader.peer_closed() && writer.is_empty() {
            // Driver hung up; nothing left to bounce.
            return Ok(());
        }
        if progressed {
            backoff.reset();
        } else {
            backoff.snooze();
        }
    }
    Ok(())
}
