//! Benchmark orchestration core.
//!
//! [`EchoBenchmark::run`] executes exactly one run to completion or fails
//! loudly. It launches the echo node on a dedicated thread, drives the
//! transceiver on the calling thread in timestamped bursts, collects the
//! sent/received timestamp sequences, and enforces the teardown order:
//! clear the running flag, join the node, destroy the transceiver. Teardown
//! happens on every path, success or failure, so threads and transport
//! resources never leak.
//!
//! Exactly two threads participate. The only suspension points are the
//! start-signal wait before the first send and the node join during
//! teardown; everything in between is non-blocking polling.

use crate::config::Configuration;
use crate::error::HarnessError;
use crate::report::RunReport;
use crate::sync::{CancelToken, ErrorCell, RunningFlag, StartSignal};
use crate::transport::{EchoNode, MessageTransceiver, Recorder};
use crossbeam::utils::Backoff;
use hdrhistogram::Histogram;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// First logical timestamp of a run. Timestamps advance by one per burst,
/// so they identify bursts, not wall-clock instants.
pub const INITIAL_TIMESTAMP: i64 = 1_000;

/// One benchmark run over a pluggable transport.
pub struct EchoBenchmark {
    config: Configuration,
    cancel: CancelToken,
}

impl EchoBenchmark {
    pub fn new(config: Configuration) -> Self {
        EchoBenchmark {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Handle for external cancellation. Cancelling mid-run aborts with
    /// [`HarnessError::Cancelled`] after best-effort teardown.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute the run.
    ///
    /// `make_transceiver` is invoked on the calling thread with the
    /// harness-owned recorder; `make_node` is invoked on the node thread
    /// with the shared running flag, so node construction failures are
    /// captured in the run's error cell like any other node fault.
    pub fn run<T, N, FT, FN>(
        &self,
        make_transceiver: FT,
        make_node: FN,
    ) -> Result<RunReport, HarnessError>
    where
        T: MessageTransceiver,
        N: EchoNode + 'static,
        FT: FnOnce(Recorder) -> Result<T, HarnessError>,
        FN: FnOnce(RunningFlag) -> Result<N, HarnessError> + Send + 'static,
    {
        let messages = self.config.message_count();
        info!(
            transport = %self.config.transport(),
            messages,
            message_length = self.config.message_length(),
            burst_size = self.config.burst_size(),
            "starting benchmark run"
        );

        let running = RunningFlag::new();
        let errors = ErrorCell::new();
        let started = StartSignal::new();

        let node_thread = {
            let running = running.clone();
            let errors = errors.clone();
            let started = started.clone();
            thread::Builder::new()
                .name("echo-node".into())
                .spawn(move || {
                    started.release();
                    match make_node(running) {
                        Ok(mut node) => {
                            if let Err(e) = node.run() {
                                errors.set(HarnessError::Node(e));
                            }
                            // Node dropped here on every exit path; Drop
                            // impls release any handles it opened.
                        }
                        Err(e) => errors.set(e),
                    }
                })?
        };

        // Driver-thread-only state. The recorder shares it with the burst
        // loop through Rc; nothing here crosses the thread boundary.
        let received: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::with_capacity(messages)));
        let burst_instants: Rc<RefCell<Vec<Instant>>> = Rc::new(RefCell::new(Vec::new()));
        let latency = Rc::new(RefCell::new(
            Histogram::<u64>::new(3)
                .map_err(|e| HarnessError::transport(anyhow::anyhow!("histogram: {e:?}")))?,
        ));

        let recorder: Recorder = {
            let received = received.clone();
            let burst_instants = burst_instants.clone();
            let latency = latency.clone();
            Box::new(move |timestamp: i64, checksum: i64| {
                if checksum != -timestamp {
                    return Err(HarnessError::Validation {
                        timestamp,
                        checksum,
                    });
                }
                let index = usize::try_from(timestamp - INITIAL_TIMESTAMP).ok();
                if let Some(at) = index.and_then(|i| burst_instants.borrow().get(i).copied()) {
                    let ns = at.elapsed().as_nanos().min(u64::MAX as u128) as u64;
                    latency.borrow_mut().saturating_record(ns.max(1));
                }
                received.borrow_mut().push(timestamp);
                Ok(())
            })
        };

        let mut transceiver: Option<T> = None;
        let mut sent: Vec<i64> = Vec::with_capacity(messages);
        let mut elapsed = Duration::ZERO;

        let loop_result = self.drive(
            &mut transceiver,
            make_transceiver,
            recorder,
            &started,
            &errors,
            &received,
            &burst_instants,
            &mut sent,
            &mut elapsed,
        );

        // Teardown runs unconditionally: stop the node, join its thread,
        // release transceiver resources.
        running.clear();
        debug!("joining echo node thread");
        let join_result = node_thread.join();
        let destroy_result = match transceiver.as_mut() {
            Some(t) => t.destroy(),
            None => Ok(()),
        };

        // A node fault makes the driver loop fail too (the dying node drops
        // its end of the medium, so the next send sees a dead peer). The
        // captured node failure is the cause; report it ahead of the loop
        // error it triggered.
        if let Some(e) = errors.take() {
            return Err(e);
        }
        if join_result.is_err() {
            return Err(HarnessError::Node(anyhow::anyhow!(
                "echo node thread panicked"
            )));
        }
        loop_result?;
        destroy_result?;

        let received = received.borrow().clone();
        if sent != received {
            let first_divergence = sent
                .iter()
                .zip(received.iter())
                .position(|(s, r)| s != r);
            return Err(HarnessError::SequenceMismatch {
                sent_len: sent.len(),
                received_len: received.len(),
                first_divergence,
            });
        }

        let report = RunReport::new(
            self.config.transport(),
            messages,
            self.config.message_length(),
            self.config.burst_size(),
            sent,
            received,
            elapsed,
            latency.borrow().clone(),
        );
        info!("run complete: {report}");
        Ok(report)
    }

    /// The send/receive loop. Runs on the calling thread; every failure
    /// path returns here and flows through the caller's teardown.
    #[allow(clippy::too_many_arguments)]
    fn drive<T, FT>(
        &self,
        slot: &mut Option<T>,
        make_transceiver: FT,
        recorder: Recorder,
        started: &StartSignal,
        errors: &ErrorCell,
        received: &Rc<RefCell<Vec<i64>>>,
        burst_instants: &Rc<RefCell<Vec<Instant>>>,
        sent: &mut Vec<i64>,
        elapsed: &mut Duration,
    ) -> Result<(), HarnessError>
    where
        T: MessageTransceiver,
        FT: FnOnce(Recorder) -> Result<T, HarnessError>,
    {
        let messages = self.config.message_count();
        let burst_max = self.config.burst_size();
        let length = self.config.message_length();

        let transceiver = slot.insert(make_transceiver(recorder)?);
        transceiver.init(&self.config)?;

        debug!("waiting for echo node start signal");
        started.wait();

        let clock = Instant::now();
        let mut timestamp = INITIAL_TIMESTAMP;
        let mut sent_count = 0usize;

        while sent_count < messages || received.borrow().len() < messages {
            if self.cancel.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }

            if sent_count < messages {
                // The final burst is clamped to what remains, so the run
                // sends exactly `messages` messages for any burst size.
                let burst = burst_max.min(messages - sent_count);
                burst_instants.borrow_mut().push(Instant::now());

                let mut accepted = 0;
                let backoff = Backoff::new();
                while accepted < burst {
                    let n =
                        transceiver.send(burst - accepted, length, timestamp, -timestamp)?;
                    transceiver.receive()?;
                    if n == 0 {
                        // Backpressure. Check for node death and external
                        // cancellation so a dead peer cannot livelock the
                        // burst, then back off without sleeping.
                        if let Some(e) = errors.take() {
                            return Err(e);
                        }
                        if self.cancel.is_cancelled() {
                            return Err(HarnessError::Cancelled);
                        }
                        backoff.snooze();
                    } else {
                        accepted += n;
                        backoff.reset();
                    }
                }

                for _ in 0..burst {
                    sent.push(timestamp);
                }
                sent_count += burst;
                timestamp += 1;
            }

            if received.borrow().len() < messages {
                transceiver.receive()?;
            }

            if let Some(e) = errors.take() {
                return Err(e);
            }
        }

        *elapsed = clock.elapsed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TransportKind;
    use crate::transport::channel::{ChannelEchoNode, ChannelMedium, ChannelTransceiver, NodeEnd};
    use std::cell::Cell;
    use std::collections::VecDeque;

    fn config(messages: usize, length: usize, burst: usize) -> Configuration {
        Configuration::builder()
            .number_of_messages(messages)
            .message_length(length)
            .burst_size(burst)
            .transport(TransportKind::Channel)
            .build()
            .unwrap()
    }

    /// Delegating transceiver that counts destroy calls.
    struct CountingTransceiver {
        inner: ChannelTransceiver,
        destroys: Rc<Cell<usize>>,
    }

    impl MessageTransceiver for CountingTransceiver {
        fn init(&mut self, config: &Configuration) -> Result<(), HarnessError> {
            self.inner.init(config)
        }

        fn send(
            &mut self,
            max_count: usize,
            length: usize,
            timestamp: i64,
            checksum: i64,
        ) -> Result<usize, HarnessError> {
            self.inner.send(max_count, length, timestamp, checksum)
        }

        fn receive(&mut self) -> Result<(), HarnessError> {
            self.inner.receive()
        }

        fn destroy(&mut self) -> Result<(), HarnessError> {
            self.destroys.set(self.destroys.get() + 1);
            self.inner.destroy()
        }
    }

    /// Node that echoes normally until the nth message, then fails.
    struct FaultyNode {
        end: NodeEnd,
        running: RunningFlag,
        fail_on: usize,
        seen: usize,
    }

    impl EchoNode for FaultyNode {
        fn run(&mut self) -> anyhow::Result<()> {
            while self.running.is_set() {
                match self.end.poll() {
                    Some(message) => {
                        self.seen += 1;
                        if self.seen == self.fail_on {
                            anyhow::bail!("injected fault on message {}", self.seen);
                        }
                        while !self.end.echo(message.clone()) {
                            if !self.running.is_set() {
                                return Ok(());
                            }
                            thread::yield_now();
                        }
                    }
                    None => thread::yield_now(),
                }
            }
            Ok(())
        }
    }

    /// Node that never touches the medium; used with local-loopback
    /// transceivers.
    struct IdleNode {
        running: RunningFlag,
    }

    impl EchoNode for IdleNode {
        fn run(&mut self) -> anyhow::Result<()> {
            while self.running.is_set() {
                thread::yield_now();
            }
            Ok(())
        }
    }

    /// Loopback transceiver that withholds the first message until after
    /// the second has been delivered. Every pair it records is valid; only
    /// the order is wrong.
    struct ReorderingTransceiver {
        queue: VecDeque<i64>,
        held: Option<i64>,
        withheld_once: bool,
        recorder: Recorder,
    }

    impl MessageTransceiver for ReorderingTransceiver {
        fn init(&mut self, _config: &Configuration) -> Result<(), HarnessError> {
            Ok(())
        }

        fn send(
            &mut self,
            max_count: usize,
            _length: usize,
            timestamp: i64,
            _checksum: i64,
        ) -> Result<usize, HarnessError> {
            for _ in 0..max_count {
                self.queue.push_back(timestamp);
            }
            Ok(max_count)
        }

        fn receive(&mut self) -> Result<(), HarnessError> {
            if !self.withheld_once && self.held.is_none() {
                if let Some(first) = self.queue.pop_front() {
                    self.held = Some(first);
                    self.withheld_once = true;
                }
            }
            let mut delivered = false;
            while let Some(timestamp) = self.queue.pop_front() {
                self.recorder.record(timestamp, -timestamp)?;
                delivered = true;
            }
            if delivered {
                if let Some(timestamp) = self.held.take() {
                    self.recorder.record(timestamp, -timestamp)?;
                }
            }
            Ok(())
        }

        fn destroy(&mut self) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    /// Loopback transceiver that corrupts the checksum on receipt.
    struct BadChecksumTransceiver {
        in_flight: VecDeque<i64>,
        recorder: Recorder,
    }

    impl MessageTransceiver for BadChecksumTransceiver {
        fn init(&mut self, _config: &Configuration) -> Result<(), HarnessError> {
            Ok(())
        }

        fn send(
            &mut self,
            max_count: usize,
            _length: usize,
            timestamp: i64,
            _checksum: i64,
        ) -> Result<usize, HarnessError> {
            for _ in 0..max_count {
                self.in_flight.push_back(timestamp);
            }
            Ok(max_count)
        }

        fn receive(&mut self) -> Result<(), HarnessError> {
            while let Some(timestamp) = self.in_flight.pop_front() {
                // Checksum should be the negation; deliver it broken.
                self.recorder.record(timestamp, timestamp)?;
            }
            Ok(())
        }

        fn destroy(&mut self) -> Result<(), HarnessError> {
            Ok(())
        }
    }

    #[test]
    fn run_completes_and_sequences_match() {
        let bench = EchoBenchmark::new(config(100, 32, 10));
        let (driver, node) = ChannelMedium::bounded(10);
        let report = bench
            .run(
                move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
                move |running| Ok(ChannelEchoNode::new(node, running)),
            )
            .unwrap();

        assert_eq!(report.sent_timestamps.len(), 100);
        assert_eq!(report.sent_timestamps, report.received_timestamps);
    }

    #[test]
    fn burst_shares_timestamp_and_increments_once_per_burst() {
        // 10 messages at burst 4 -> bursts of 4, 4, 2.
        let bench = EchoBenchmark::new(config(10, 16, 4));
        let (driver, node) = ChannelMedium::bounded(4);
        let report = bench
            .run(
                move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
                move |running| Ok(ChannelEchoNode::new(node, running)),
            )
            .unwrap();

        let expected: Vec<i64> = vec![
            1000, 1000, 1000, 1000, 1001, 1001, 1001, 1001, 1002, 1002,
        ];
        assert_eq!(report.sent_timestamps, expected);
        assert_eq!(report.received_timestamps, expected);
    }

    #[test]
    fn single_message_bursts_increment_per_message() {
        let bench = EchoBenchmark::new(config(5, 8, 1));
        let (driver, node) = ChannelMedium::bounded(1);
        let report = bench
            .run(
                move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
                move |running| Ok(ChannelEchoNode::new(node, running)),
            )
            .unwrap();

        assert_eq!(
            report.sent_timestamps,
            vec![1000, 1001, 1002, 1003, 1004]
        );
    }

    #[test]
    fn node_fault_surfaces_and_transceiver_is_destroyed_once() {
        let bench = EchoBenchmark::new(config(100, 32, 5));
        let (driver, node) = ChannelMedium::bounded(5);
        let destroys = Rc::new(Cell::new(0));
        let counter = destroys.clone();

        let result = bench.run(
            move |recorder| {
                Ok(CountingTransceiver {
                    inner: ChannelTransceiver::new(driver, recorder),
                    destroys: counter,
                })
            },
            move |running| {
                Ok(FaultyNode {
                    end: node,
                    running,
                    fail_on: 3,
                    seen: 0,
                })
            },
        );

        match result {
            Err(HarnessError::Node(e)) => {
                assert!(e.to_string().contains("injected fault on message 3"))
            }
            other => panic!("expected node failure, got {other:?}"),
        }
        assert_eq!(destroys.get(), 1);
    }

    #[test]
    fn node_fault_wins_over_the_disconnect_it_causes() {
        // A node that dies on its first message drops its channel ends, so
        // the driver's next send fails with a transport error. The run must
        // still report the node fault, not the secondary disconnect.
        let bench = EchoBenchmark::new(config(100, 32, 2));
        let (driver, node) = ChannelMedium::bounded(2);

        let result = bench.run(
            move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
            move |running| {
                Ok(FaultyNode {
                    end: node,
                    running,
                    fail_on: 1,
                    seen: 0,
                })
            },
        );

        match result {
            Err(HarnessError::Node(e)) => {
                assert!(e.to_string().contains("injected fault on message 1"))
            }
            other => panic!("expected the node fault, got {other:?}"),
        }
    }

    #[test]
    fn out_of_order_delivery_fails_the_sequence_oracle() {
        // Burst size one, so every message has a distinct timestamp and the
        // reorder is visible to the oracle.
        let bench = EchoBenchmark::new(config(3, 8, 1));

        let result = bench.run(
            move |recorder| {
                Ok(ReorderingTransceiver {
                    queue: VecDeque::new(),
                    held: None,
                    withheld_once: false,
                    recorder,
                })
            },
            move |running| Ok(IdleNode { running }),
        );

        match result {
            Err(HarnessError::SequenceMismatch {
                sent_len,
                received_len,
                first_divergence,
            }) => {
                assert_eq!(sent_len, 3);
                assert_eq!(received_len, 3);
                assert_eq!(first_divergence, Some(0));
            }
            other => panic!("expected a sequence mismatch, got {other:?}"),
        }
    }

    #[test]
    fn node_factory_failure_surfaces_as_run_error() {
        let bench = EchoBenchmark::new(config(10, 8, 2));
        let (driver, _node) = ChannelMedium::bounded(2);

        let result = bench.run(
            move |recorder| Ok(ChannelTransceiver::new(driver, recorder)),
            move |_running| -> Result<ChannelEchoNode, HarnessError> {
                Err(HarnessError::init(anyhow::anyhow!("no node for you")))
            },
        );

        match result {
            Err(HarnessError::Init(e)) => assert!(e.to_string().contains("no node for you")),
            other => panic!("expected init failure, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_aborts_with_cancelled() {
        let bench = EchoBenchmark::new(config(1_000_000, 32, 10));
        bench.cancel_token().cancel();

        let (driver, node) = ChannelMedium::bounded(10);
        let destroys = Rc::new(Cell::new(0));
        let counter = destroys.clone();
        let result = bench.run(
            move |recorder| {
                Ok(CountingTransceiver {
                    inner: ChannelTransceiver::new(driver, recorder),
                    destroys: counter,
                })
            },
            move |running| Ok(ChannelEchoNode::new(node, running)),
        );

        assert!(matches!(result, Err(HarnessError::Cancelled)));
        // Teardown still ran.
        assert_eq!(destroys.get(), 1);
    }

    #[test]
    fn broken_checksum_fails_validation() {
        let bench = EchoBenchmark::new(config(10, 8, 2));

        let result = bench.run(
            move |recorder| {
                Ok(BadChecksumTransceiver {
                    in_flight: VecDeque::new(),
                    recorder,
                })
            },
            move |running| Ok(IdleNode { running }),
        );

        match result {
            Err(HarnessError::Validation {
                timestamp,
                checksum,
            }) => {
                assert_eq!(timestamp, 1000);
                assert_eq!(checksum, 1000);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn transceiver_factory_failure_still_joins_node() {
        let bench = EchoBenchmark::new(config(10, 8, 2));
        let result = bench.run(
            move |_recorder| -> Result<BadChecksumTransceiver, HarnessError> {
                Err(HarnessError::init(anyhow::anyhow!("bad wiring")))
            },
            move |running| Ok(IdleNode { running }),
        );
        assert!(matches!(result, Err(HarnessError::Init(_))));
    }
}
