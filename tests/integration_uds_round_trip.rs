#![cfg(unix)]

use anyhow::Result;
use echo_harness::{transport, Configuration, EchoBenchmark, TransportKind};

/// Verify the Unix domain socket transport end-to-end, with the socket
/// file created under a scratch directory and removed on teardown.
#[test]
fn uds_round_trip_smoke() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = Configuration::builder()
        .number_of_messages(500)
        .message_length(128)
        .burst_size(4)
        .transport(TransportKind::UnixDomainSocket)
        .output_directory(dir.path())
        .output_file_name_prefix("uds-smoke")
        .build()?;

    let bench = EchoBenchmark::new(config);
    let report = transport::launch(&bench)?;

    assert_eq!(report.sent_timestamps.len(), 500);
    assert_eq!(report.sent_timestamps, report.received_timestamps);

    // The acceptor owns the socket file and unlinks it when the node
    // thread finishes.
    assert!(!dir.path().join("uds-smoke.sock").exists());
    Ok(())
}
