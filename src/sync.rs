//! Cross-thread coordination cells.
//!
//! Exactly two pieces of state cross the driver/node thread boundary during
//! a run: the running flag (driver writes, node reads) and the error cell
//! (node writes, driver reads). Both are modeled here as explicit types so
//! the contract is testable in isolation. The start signal is a one-shot
//! latch released by the node thread on entry; the cancel token is the
//! driver-side abort switch for embedders.

use crate::error::HarnessError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::warn;

/// Shared run/stop flag. Starts set; cleared exactly once by the driver
/// during teardown. Single writer (driver), single reader (node).
#[derive(Clone, Debug)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        RunningFlag(Arc::new(AtomicBool::new(true)))
    }

    /// True while the run is live. Checked by the echo node between
    /// messages; never mid-message.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Signal the node to stop. Cooperative: in-flight messages may be
    /// lost after this and are not retried.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// External cancellation switch for the driver loop. Observed cancellation
/// fails the run with [`HarnessError::Cancelled`] after best-effort teardown.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One-shot latch the node thread releases immediately on entry. The driver
/// waits on it before the first send, guaranteeing the node is scheduled
/// before traffic begins.
#[derive(Clone, Debug)]
pub struct StartSignal(Arc<(Mutex<bool>, Condvar)>);

impl StartSignal {
    pub fn new() -> Self {
        StartSignal(Arc::new((Mutex::new(false), Condvar::new())))
    }

    /// Fire the latch. Releasing more than once is a no-op.
    pub fn release(&self) {
        let (lock, cvar) = &*self.0;
        let mut released = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *released = true;
        cvar.notify_all();
    }

    /// Block until the latch has fired. Returns immediately if it already has.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut released = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = cvar.wait(released).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Default for StartSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// First-failure-wins slot shared between the node thread and the driver.
/// The node writes, the driver checks and drains. Later failures on the
/// same side are logged, never silently lost.
#[derive(Clone, Debug)]
pub struct ErrorCell {
    slot: Arc<Mutex<Option<HarnessError>>>,
    armed: Arc<AtomicBool>,
}

impl ErrorCell {
    pub fn new() -> Self {
        ErrorCell {
            slot: Arc::new(Mutex::new(None)),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Capture a failure. The first caller wins; subsequent errors are
    /// logged and dropped.
    pub fn set(&self, err: HarnessError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
            self.armed.store(true, Ordering::Release);
        } else {
            warn!("dropping secondary failure (first wins): {err}");
        }
    }

    /// Cheap check for the driver's per-iteration poll.
    pub fn is_set(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Drain the captured failure, if any.
    pub fn take(&self) -> Option<HarnessError> {
        if !self.is_set() {
            return None;
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }
}

impl Default for ErrorCell {
    fn default() -> Self {
        Self::new()
    }
}
