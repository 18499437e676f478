//! Single-opener guard for the device node.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PipeError, Result};

/// Admits at most one open session at a time.
///
/// Advisory: it does not serialize reads, writes or control commands issued
/// through an already-open session.
#[derive(Debug)]
pub struct SessionGuard {
    name: String,
    open: AtomicBool,
}

impl SessionGuard {
    /// Unclaimed guard for the named node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
        }
    }

    /// Claims the device, failing with [`PipeError::Busy`] if already claimed.
    pub fn open(&self) -> Result<()> {
        match self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::debug!("Session opened: {}", self.name);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Rejected open, device busy: {}", self.name);
                Err(PipeError::Busy {
                    name: self.name.clone(),
                })
            }
        }
    }

    /// Releases the device. Closing an idle guard is harmless.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!("Session closed: {}", self.name);
        }
    }

    /// Whether a session holds the claim.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
