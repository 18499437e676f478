//! Status surface rendering.
//!
//! Readers follow a two-phase protocol: the first read returns the counter
//! as `"<value>\n"`, the next returns nothing to mark end of stream, and the
//! cycle then starts over.

use std::sync::atomic::{AtomicBool, Ordering};

/// Size the status file advertises in its attributes.
pub const STATUS_FILE_SIZE: u64 = 37;

/// Two-phase read state of one status reader.
#[derive(Debug, Default)]
pub struct StatusReporter {
    finished: AtomicBool,
}

impl StatusReporter {
    /// Creates a reporter whose next read delivers the value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rendered value, or an empty buffer if the previous call
    /// already delivered it.
    pub fn read(&self, counter: u64) -> Vec<u8> {
        if self.finished.swap(false, Ordering::AcqRel) {
            tracing::debug!("Status read: end of stream");
            return Vec::new();
        }
        self.finished.store(true, Ordering::Release);
        render(counter).into_bytes()
    }

}

/// Renders a counter value as the status file contents.
pub fn render(counter: u64) -> String {
    format!("{}\n", counter)
}
