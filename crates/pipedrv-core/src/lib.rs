#![warn(missing_docs)]

//! pipedrv core: a bounded byte FIFO device with a control channel driving a
//! background counter, and a status surface exposing that counter.

pub mod cancel;
pub mod config;
pub mod control;
pub mod counter;
pub mod device;
pub mod error;
pub mod fifo;
pub mod guard;
pub mod ioctl;
pub mod status;

pub use config::DeviceConfig;
pub use device::PipeDevice;
pub use error::{PipeError, Result};
pub use fifo::{ByteFifo, BUF_SIZE};
pub use ioctl::ControlCommand;
