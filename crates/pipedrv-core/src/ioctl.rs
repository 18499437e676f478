//! Control command codec.
//!
//! Command numbers use the Linux generic `_IOC` layout so the FUSE kernel
//! module can forward them as restricted ioctls: the argument size and
//! direction travel inside the command word.
//!
//! ```text
//!  31  30 29           16 15        8 7          0
//! +------+---------------+-----------+------------+
//! | dir  |     size      |   type    |     nr     |
//! +------+---------------+-----------+------------+
//! ```

use std::mem::size_of;

use crate::error::{PipeError, Result};

const NRBITS: u32 = 8;
const TYPEBITS: u32 = 8;
const SIZEBITS: u32 = 14;
const DIRBITS: u32 = 2;

const NRSHIFT: u32 = 0;
const TYPESHIFT: u32 = NRSHIFT + NRBITS;
const SIZESHIFT: u32 = TYPESHIFT + TYPEBITS;
const DIRSHIFT: u32 = SIZESHIFT + SIZEBITS;

const NRMASK: u32 = (1 << NRBITS) - 1;
const TYPEMASK: u32 = (1 << TYPEBITS) - 1;
const SIZEMASK: u32 = (1 << SIZEBITS) - 1;
const DIRMASK: u32 = (1 << DIRBITS) - 1;

/// No data transfer.
pub const IOC_NONE: u32 = 0;
/// User space writes, the device reads.
pub const IOC_WRITE: u32 = 1;
/// The device writes, user space reads.
pub const IOC_READ: u32 = 2;

/// Type (magic) byte identifying this device's command namespace.
pub const PIPE_IOC_MAGIC: u32 = 1;
/// Highest command number accepted by range validation.
pub const PIPE_IOC_MAXNR: u32 = 5;

/// Size of the integer argument on the wire (a C `int`).
pub const ARG_SIZE: usize = size_of::<i32>();

/// Packs the four `_IOC` fields into a command word.
pub const fn encode(dir: u32, ty: u32, nr: u32, size: u32) -> u32 {
    ((dir & DIRMASK) << DIRSHIFT)
        | ((size & SIZEMASK) << SIZESHIFT)
        | ((ty & TYPEMASK) << TYPESHIFT)
        | ((nr & NRMASK) << NRSHIFT)
}

/// Transfer direction field.
pub const fn dir(cmd: u32) -> u32 {
    (cmd >> DIRSHIFT) & DIRMASK
}

/// Type (magic) field.
pub const fn ty(cmd: u32) -> u32 {
    (cmd >> TYPESHIFT) & TYPEMASK
}

/// Command number field.
pub const fn nr(cmd: u32) -> u32 {
    (cmd >> NRSHIFT) & NRMASK
}

/// Argument size field.
pub const fn size(cmd: u32) -> u32 {
    (cmd >> SIZESHIFT) & SIZEMASK
}

/// `_IOW(1, 0, int)`
pub const PIPE_IOC_SET_PERIOD: u32 = encode(IOC_WRITE, PIPE_IOC_MAGIC, 0, ARG_SIZE as u32);
/// `_IOR(1, 1, int)`
pub const PIPE_IOC_GET_COUNTER: u32 = encode(IOC_READ, PIPE_IOC_MAGIC, 1, ARG_SIZE as u32);
/// `_IO(1, 2)`
pub const PIPE_IOC_RUN: u32 = encode(IOC_NONE, PIPE_IOC_MAGIC, 2, 0);
/// `_IO(1, 3)`
pub const PIPE_IOC_STOP: u32 = encode(IOC_NONE, PIPE_IOC_MAGIC, 3, 0);

/// A validated control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Change the counter period.
    SetPeriod {
        /// New period, always positive.
        period_ms: u64,
    },
    /// Read the counter without resetting it.
    GetCounter,
    /// Start the counter task.
    Run,
    /// Stop the counter task and wait for it to exit.
    Stop,
}

impl ControlCommand {
    /// Validates a raw command word and its input payload.
    ///
    /// Identity and range are checked before anything else, so a rejected
    /// command never looks at its argument.
    pub fn decode(cmd: u32, in_data: &[u8]) -> Result<Self> {
        if ty(cmd) != PIPE_IOC_MAGIC || nr(cmd) > PIPE_IOC_MAXNR {
            return Err(PipeError::UnsupportedOperation { cmd });
        }

        match cmd {
            PIPE_IOC_SET_PERIOD => {
                let raw: [u8; ARG_SIZE] =
                    in_data
                        .try_into()
                        .map_err(|_| PipeError::InvalidArgument {
                            msg: format!(
                                "SET_PERIOD expects {} bytes, got {}",
                                ARG_SIZE,
                                in_data.len()
                            ),
                        })?;
                let value = i32::from_ne_bytes(raw);
                if value <= 0 {
                    return Err(PipeError::InvalidArgument {
                        msg: format!("period must be positive, got {}", value),
                    });
                }
                Ok(ControlCommand::SetPeriod {
                    period_ms: value as u64,
                })
            }
            PIPE_IOC_GET_COUNTER => Ok(ControlCommand::GetCounter),
            PIPE_IOC_RUN => Ok(ControlCommand::Run),
            PIPE_IOC_STOP => Ok(ControlCommand::Stop),
            _ => Err(PipeError::UnsupportedOperation { cmd }),
        }
    }

    /// The command word this request travels as.
    pub fn code(&self) -> u32 {
        match self {
            ControlCommand::SetPeriod { .. } => PIPE_IOC_SET_PERIOD,
            ControlCommand::GetCounter => PIPE_IOC_GET_COUNTER,
            ControlCommand::Run => PIPE_IOC_RUN,
            ControlCommand::Stop => PIPE_IOC_STOP,
        }
    }

    /// Command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::SetPeriod { .. } => "SET_PERIOD",
            ControlCommand::GetCounter => "GET_COUNTER",
            ControlCommand::Run => "RUN",
            ControlCommand::Stop => "STOP",
        }
    }
}

/// Encodes a counter value as the GET_COUNTER output payload.
///
/// Values beyond `i32::MAX` saturate.
pub fn encode_counter(value: u64) -> [u8; ARG_SIZE] {
    i32::try_from(value).unwrap_or(i32::MAX).to_ne_bytes()
}
