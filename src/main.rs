//! Echo Harness binary entry point.
//!
//! Parses the command line, expands the transport selection, and executes
//! one benchmark run per transport, printing a JSON summary for each. On
//! failure the process either aborts or, with `--continue-on-error`, moves
//! on to the remaining transports.

use anyhow::Result;
use clap::Parser;
use echo_harness::{
    cli::{Args, TransportKind},
    transport, Configuration, EchoBenchmark,
};
use tracing::{error, info};

fn main() -> Result<()> {
    // Log level is controlled via RUST_LOG, e.g.
    // RUST_LOG=debug echo-harness -t all
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!("starting echo harness v{}", echo_harness::VERSION);

    let transports = TransportKind::expand_all(args.transports.clone());
    let mut failures = 0usize;

    for kind in transports {
        match run_transport(&args, kind) {
            Ok(()) => info!("benchmark completed for {kind}"),
            Err(e) => {
                error!("benchmark failed for {kind}: {e:#}");
                failures += 1;
                if !args.continue_on_error {
                    return Err(e);
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} benchmark run(s) failed");
    }
    Ok(())
}

fn run_transport(args: &Args, kind: TransportKind) -> Result<()> {
    let config = Configuration::builder()
        .number_of_messages(args.messages)
        .message_length(args.message_length)
        .burst_size(args.burst_size)
        .transport(kind)
        .output_directory(args.output_directory.clone())
        .output_file_name_prefix(args.output_prefix.clone())
        .build()?;

    let bench = EchoBenchmark::new(config);
    let report = transport::launch(&bench)?;

    println!("{}", serde_json::to_string_pretty(&report.summary())?);
    Ok(())
}
