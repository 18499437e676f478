//! Background counter task.
//!
//! The task increments a shared counter, sleeps for the current period, then
//! checks its cancellation token. Stopping is cooperative: a stop request is
//! observed after the sleep in progress finishes, so the caller of
//! [`CounterTask::stop`] may block for up to one period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::{new_cancel_pair, CancelHandle, CancelReason, CancelToken};
use crate::error::Result;

/// Default increment interval in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 1000;

/// Counter value and period shared between the dispatcher, the task and the
/// status reporter.
#[derive(Debug)]
pub struct CounterState {
    counter: AtomicU64,
    period_ms: AtomicU64,
}

impl CounterState {
    /// Zero counter with the given period.
    pub fn new(period_ms: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            period_ms: AtomicU64::new(period_ms),
        }
    }

    /// Current counter value.
    pub fn value(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Current period in milliseconds.
    pub fn period_ms(&self) -> u64 {
        self.period_ms.load(Ordering::SeqCst)
    }

    /// Takes effect on the running task's next cycle.
    pub fn set_period_ms(&self, period_ms: u64) {
        self.period_ms.store(period_ms, Ordering::SeqCst);
    }

    fn increment(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for CounterState {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD_MS)
    }
}

/// Handle to one running counter thread.
#[derive(Debug)]
pub struct CounterTask {
    cancel: CancelHandle,
    thread: JoinHandle<()>,
}

impl CounterTask {
    /// Spawns the counter thread.
    pub fn spawn(state: Arc<CounterState>) -> Result<Self> {
        let (token, cancel) = new_cancel_pair();
        let thread = thread::Builder::new()
            .name("pipedrv-counter".into())
            .spawn(move || run_loop(&state, &token))?;
        tracing::info!("Counter task started");
        Ok(Self { cancel, thread })
    }

    /// Requests cancellation and waits for the thread to exit.
    pub fn stop(self, reason: CancelReason) {
        self.cancel.cancel(reason);
        if self.thread.join().is_err() {
            tracing::error!("Counter task panicked before acknowledging stop");
            return;
        }
        tracing::info!("Counter task stopped: {}", reason);
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

fn run_loop(state: &CounterState, token: &CancelToken) {
    loop {
        let value = state.increment();
        let period = state.period_ms();
        tracing::trace!("counter={} sleeping {}ms", value, period);
        thread::sleep(Duration::from_millis(period));
        if token.is_cancelled() {
            break;
        }
    }
}
