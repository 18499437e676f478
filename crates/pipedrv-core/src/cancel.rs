//! Cooperative cancellation for the background counter task.
//!
//! A token/handle pair shares one flag. The worker polls the token at its
//! checkpoints; the owner triggers the handle and then joins the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reasons for stopping a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// Explicit STOP control command.
    #[default]
    StopRequested,
    /// The owning device is being torn down.
    Teardown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::StopRequested => write!(f, "StopRequested"),
            CancelReason::Teardown => write!(f, "Teardown"),
        }
    }
}

/// Worker side: checked at each loop checkpoint.
#[derive(Clone, Debug)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Whether the owner has asked the worker to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owner side: triggers cancellation.
#[derive(Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Signals the worker. Repeated calls are harmless.
    pub fn cancel(&self, reason: CancelReason) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("Cancellation requested: {}", reason);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Create a new cancellation token/handle pair.
pub fn new_cancel_pair() -> (CancelToken, CancelHandle) {
    let cancelled = Arc::new(AtomicBool::new(false));
    (
        CancelToken {
            cancelled: cancelled.clone(),
        },
        CancelHandle { cancelled },
    )
}
