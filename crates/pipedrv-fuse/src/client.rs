//! User-space client for a mounted pipe device.
//!
//! Issues control commands as ioctls on the device node and reads the status
//! file through its two-phase protocol.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::Path;

use pipedrv_core::ioctl::{PIPE_IOC_GET_COUNTER, PIPE_IOC_RUN, PIPE_IOC_SET_PERIOD, PIPE_IOC_STOP};

/// An open session on the device node.
///
/// Holding a client claims the device; a second client fails with `EBUSY`
/// until this one is dropped.
#[derive(Debug)]
pub struct DeviceClient {
    file: File,
}

impl DeviceClient {
    /// Opens the device node for reading and writing.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// SET_PERIOD: changes the counter period.
    pub fn set_period(&self, period_ms: i32) -> io::Result<()> {
        let mut arg: libc::c_int = period_ms;
        self.ioctl(PIPE_IOC_SET_PERIOD, &mut arg)
    }

    /// GET_COUNTER: reads the counter.
    pub fn counter(&self) -> io::Result<i32> {
        let mut arg: libc::c_int = 0;
        self.ioctl(PIPE_IOC_GET_COUNTER, &mut arg)?;
        Ok(arg)
    }

    /// RUN: starts the counter task.
    pub fn run(&self) -> io::Result<()> {
        self.ioctl_none(PIPE_IOC_RUN)
    }

    /// STOP: stops the counter task, blocking until it exits.
    pub fn stop(&self) -> io::Result<()> {
        self.ioctl_none(PIPE_IOC_STOP)
    }

    fn ioctl(&self, cmd: u32, arg: &mut libc::c_int) -> io::Result<()> {
        // SAFETY: the fd is owned by `self.file` and `arg` points to a live
        // c_int matching the size encoded in `cmd`.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), cmd as _, arg as *mut libc::c_int) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ioctl_none(&self, cmd: u32) -> io::Result<()> {
        // SAFETY: commands without a payload ignore the argument.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), cmd as _, 0 as libc::c_ulong) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Reads one full cycle of the status file and parses the counter.
pub fn read_status(path: &Path) -> io::Result<u64> {
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    parse_status(&text)
}

/// Parses one `"<n>\n"` status record.
pub fn parse_status(text: &str) -> io::Result<u64> {
    text.trim_end_matches('\n')
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad status {:?}: {}", text, e)))
}
