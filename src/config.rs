//! Immutable run configuration.
//!
//! A [`Configuration`] describes exactly one benchmark run and is read-only
//! once built. All validation happens in [`ConfigurationBuilder::build`];
//! invalid combinations fail there, never at run time.

use crate::cli::TransportKind;
use anyhow::{ensure, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Immutable description of a benchmark run.
#[derive(Clone, Debug, Serialize)]
pub struct Configuration {
    message_count: usize,
    message_length: usize,
    burst_size: usize,
    transport: TransportKind,
    output_directory: PathBuf,
    output_prefix: String,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Total messages the run drives through the transport.
    pub fn message_count(&self) -> usize {
        self.message_count
    }

    /// Payload size in bytes of every message.
    pub fn message_length(&self) -> usize {
        self.message_length
    }

    /// Messages sent under one logical timestamp before it advances.
    pub fn burst_size(&self) -> usize {
        self.burst_size
    }

    /// Transport implementation under test.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Directory for any scratch files the transport creates.
    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Name prefix for files created under the output directory.
    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }
}

/// Builder for [`Configuration`]. Numeric fields must be positive; the
/// transport must be a concrete kind (`All` is expanded by the caller).
#[derive(Clone, Debug)]
pub struct ConfigurationBuilder {
    message_count: usize,
    message_length: usize,
    burst_size: usize,
    transport: TransportKind,
    output_directory: PathBuf,
    output_prefix: String,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        ConfigurationBuilder {
            message_count: crate::defaults::MESSAGE_COUNT,
            message_length: crate::defaults::MESSAGE_LENGTH,
            burst_size: crate::defaults::BURST_SIZE,
            transport: TransportKind::Channel,
            output_directory: PathBuf::from("."),
            output_prefix: crate::defaults::OUTPUT_PREFIX.to_string(),
        }
    }
}

impl ConfigurationBuilder {
    pub fn number_of_messages(mut self, count: usize) -> Self {
        self.message_count = count;
        self
    }

    pub fn message_length(mut self, length: usize) -> Self {
        self.message_length = length;
        self
    }

    pub fn burst_size(mut self, burst: usize) -> Self {
        self.burst_size = burst;
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    pub fn output_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Configuration> {
        ensure!(self.message_count > 0, "number of messages must be positive");
        ensure!(self.message_length > 0, "message length must be positive");
        ensure!(self.burst_size > 0, "burst size must be positive");
        ensure!(
            self.transport != TransportKind::All,
            "'all' must be expanded to concrete transports before building"
        );
        ensure!(!self.output_prefix.is_empty(), "output prefix must not be empty");

        Ok(Configuration {
            message_count: self.message_count,
            message_length: self.message_length,
            burst_size: self.burst_size,
            transport: self.transport,
            output_directory: self.output_directory,
            output_prefix: self.output_prefix,
        })
    }
}
