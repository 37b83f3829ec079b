use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Echo Harness - round-trip throughput and latency for pluggable transports
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Transports to benchmark (space-separated: channel, tcp, uds, or all)
    #[clap(short = 't', long = "transports", value_enum, default_values_t = vec![TransportKind::Channel], num_args = 1..)]
    pub transports: Vec<TransportKind>,

    /// Number of messages to drive through the transport
    #[clap(short = 'n', long, default_value_t = crate::defaults::MESSAGE_COUNT)]
    pub messages: usize,

    /// Message payload size in bytes
    #[clap(short = 's', long, default_value_t = crate::defaults::MESSAGE_LENGTH)]
    pub message_length: usize,

    /// Messages sent per burst (one logical timestamp per burst)
    #[clap(short = 'b', long, default_value_t = crate::defaults::BURST_SIZE)]
    pub burst_size: usize,

    /// Directory for transport scratch files (e.g. socket paths)
    #[clap(short = 'o', long, default_value = ".")]
    pub output_directory: PathBuf,

    /// Prefix for files the run creates under the output directory
    #[clap(long, default_value = crate::defaults::OUTPUT_PREFIX)]
    pub output_prefix: String,

    /// Continue benchmarking remaining transports even if one run fails
    #[clap(long, default_value_t = false)]
    pub continue_on_error: bool,
}

/// Available transports under test
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TransportKind {
    /// In-process bounded channels
    #[clap(name = "channel")]
    Channel,

    /// TCP loopback sockets
    #[clap(name = "tcp")]
    Tcp,

    /// Unix domain sockets
    #[cfg(unix)]
    #[clap(name = "uds")]
    UnixDomainSocket,

    /// All available transports
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Channel => write!(f, "Channel"),
            TransportKind::Tcp => write!(f, "TCP Socket"),
            #[cfg(unix)]
            TransportKind::UnixDomainSocket => write!(f, "Unix Domain Socket"),
            TransportKind::All => write!(f, "All Transports"),
        }
    }
}

impl TransportKind {
    /// Expand the "All" variant to every concrete transport
    pub fn expand_all(kinds: Vec<TransportKind>) -> Vec<TransportKind> {
        if kinds.contains(&TransportKind::All) {
            let mut all = vec![TransportKind::Channel, TransportKind::Tcp];
            #[cfg(unix)]
            all.push(TransportKind::UnixDomainSocket);
            all
        } else {
            kinds
        }
    }
}
