//! Device errors and their errno mapping.

use thiserror::Error;

/// Errors raised by the pipe device.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device node is already held by another session.
    #[error("Device busy: {name} is already open")]
    Busy {
        /// Device node name.
        name: String,
    },

    /// Control command outside this device's namespace or range.
    #[error("Unsupported control operation: cmd={cmd:#010x}")]
    UnsupportedOperation {
        /// Raw command word.
        cmd: u32,
    },

    /// Control command argument rejected.
    #[error("Invalid argument: {msg}")]
    InvalidArgument {
        /// What was wrong with it.
        msg: String,
    },

    /// A lock was poisoned by a panicking holder.
    #[error("Device state poisoned: {what}")]
    Poisoned {
        /// Which lock.
        what: &'static str,
    },

    /// Configuration failed validation or parsing.
    #[error("Invalid configuration: {msg}")]
    Config {
        /// Reason.
        msg: String,
    },
}

/// Result alias for device operations.
pub type Result<T> = std::result::Result<T, PipeError>;

impl PipeError {
    /// Errno reported to callers of the device node.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            PipeError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            PipeError::Busy { .. } => EBUSY,
            PipeError::UnsupportedOperation { .. } => ENOTTY,
            PipeError::InvalidArgument { .. } => EINVAL,
            PipeError::Poisoned { .. } => EIO,
            PipeError::Config { .. } => EINVAL,
        }
    }
}
