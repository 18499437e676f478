#![warn(missing_docs)]

//! pipedrv FUSE subsystem: exposes a [`pipedrv_core::PipeDevice`] as a device
//! node and a status file under a mount point.

pub mod cli;
pub mod client;
pub mod filesystem;
pub mod mount;
pub mod session;

pub use filesystem::PipeFilesystem;
pub use mount::{MountError, MountOptions};
pub use session::{SessionConfig, SessionHandle};
