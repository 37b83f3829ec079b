use anyhow::Result;
use echo_harness::{transport, Configuration, EchoBenchmark, RunReport, TransportKind};

fn run(messages: usize, message_length: usize, burst_size: usize) -> Result<RunReport> {
    let config = Configuration::builder()
        .number_of_messages(messages)
        .message_length(message_length)
        .burst_size(burst_size)
        .transport(TransportKind::Channel)
        .build()?;
    let bench = EchoBenchmark::new(config);
    Ok(transport::launch(&bench)?)
}

#[test]
fn message_length_32_bytes() -> Result<()> {
    let report = run(10_000, 32, 10)?;
    assert_eq!(report.sent_timestamps.len(), 10_000);
    assert_eq!(report.received_timestamps.len(), 10_000);
    assert_eq!(report.sent_timestamps, report.received_timestamps);
    Ok(())
}

#[test]
fn message_length_224_bytes() -> Result<()> {
    let report = run(1000, 224, 5)?;
    assert_eq!(report.sent_timestamps, report.received_timestamps);

    // 1000 messages at burst 5 is exactly 200 bursts, each under its own
    // timestamp.
    let mut timestamps = report.sent_timestamps.clone();
    timestamps.dedup();
    assert_eq!(timestamps.len(), 200);
    assert_eq!(*report.sent_timestamps.first().unwrap(), 1000);
    assert_eq!(*report.sent_timestamps.last().unwrap(), 1199);
    Ok(())
}

#[test]
fn message_length_1376_bytes() -> Result<()> {
    let report = run(100, 1376, 1)?;
    assert_eq!(report.sent_timestamps, report.received_timestamps);

    // Burst size one: the timestamp advances on every message.
    let expected: Vec<i64> = (1000..1100).collect();
    assert_eq!(report.sent_timestamps, expected);
    Ok(())
}
