//! The device state object.
//!
//! [`PipeDevice`] bundles every component behind the four device-node entry
//! points and the control channel. The status surface renders [`counter`]
//! through its own [`StatusReporter`] per reader. The device is constructed
//! explicitly and shared by reference; teardown stops the counter task and
//! clears the buffer.
//!
//! [`counter`]: PipeDevice::counter
//! [`StatusReporter`]: crate::status::StatusReporter

use std::sync::{Arc, Mutex, MutexGuard};

use crate::cancel::CancelReason;
use crate::config::DeviceConfig;
use crate::control::{ControlDispatcher, ControlReply};
use crate::counter::CounterState;
use crate::error::{PipeError, Result};
use crate::fifo::ByteFifo;
use crate::guard::SessionGuard;
use crate::ioctl::ControlCommand;

/// Buffer, open guard and control dispatcher of one device.
pub struct PipeDevice {
    config: DeviceConfig,
    fifo: Mutex<ByteFifo>,
    guard: SessionGuard,
    control: ControlDispatcher,
}

impl PipeDevice {
    /// Validates `config` and builds an idle device with an empty buffer.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let counter = Arc::new(CounterState::new(config.period_ms));
        tracing::info!(
            "{} init: capacity={}, period={}ms",
            config.device_name,
            crate::fifo::BUF_SIZE,
            config.period_ms
        );
        Ok(Self {
            guard: SessionGuard::new(config.device_name.clone()),
            fifo: Mutex::new(ByteFifo::new()),
            control: ControlDispatcher::new(counter),
            config,
        })
    }

    /// The configuration the device was built with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Claims the device for one session; fails with `Busy` if claimed.
    pub fn open(&self) -> Result<()> {
        self.guard.open()
    }

    /// Releases the session claim.
    pub fn close(&self) {
        self.guard.close()
    }

    /// Whether a session holds the device.
    pub fn is_open(&self) -> bool {
        self.guard.is_open()
    }

    /// Appends to the buffer; returns how many bytes were accepted.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let accepted = self.lock_fifo()?.append(data);
        tracing::debug!("write requested={} accepted={}", data.len(), accepted);
        Ok(accepted)
    }

    /// Extracts up to `len` bytes in FIFO order.
    pub fn read(&self, len: usize) -> Result<Vec<u8>> {
        let out = self.lock_fifo()?.extract(len);
        tracing::debug!("read requested={} returned={}", len, out.len());
        Ok(out)
    }

    /// Extracts into a caller buffer; returns the number of bytes copied.
    pub fn read_into(&self, out: &mut [u8]) -> Result<usize> {
        Ok(self.lock_fifo()?.extract_into(out))
    }

    /// Number of bytes currently pending in the buffer.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock_fifo()?.len())
    }

    /// Handles a raw ioctl and returns its output payload.
    pub fn ioctl(&self, cmd: u32, in_data: &[u8]) -> Result<Vec<u8>> {
        self.control.dispatch_raw(cmd, in_data).map(|r| r.to_bytes())
    }

    /// Applies an already decoded command.
    pub fn control(&self, command: ControlCommand) -> Result<ControlReply> {
        self.control.dispatch(command)
    }

    /// Current counter value.
    pub fn counter(&self) -> u64 {
        self.control.state().value()
    }

    /// Current counter period in milliseconds.
    pub fn period_ms(&self) -> u64 {
        self.control.state().period_ms()
    }

    /// Whether the counter task is running.
    pub fn is_counting(&self) -> bool {
        self.control.is_running()
    }

    /// Stops the counter task and drops any buffered data.
    pub fn shutdown(&self) -> Result<()> {
        self.control.stop(CancelReason::Teardown)?;
        self.lock_fifo()?.clear();
        self.guard.close();
        tracing::info!("{} shut down", self.config.device_name);
        Ok(())
    }

    fn lock_fifo(&self) -> Result<MutexGuard<'_, ByteFifo>> {
        self.fifo
            .lock()
            .map_err(|_| PipeError::Poisoned { what: "fifo" })
    }
}

impl std::fmt::Debug for PipeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeDevice")
            .field("name", &self.config.device_name)
            .field("open", &self.guard.is_open())
            .field("counter", &self.counter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::{PIPE_IOC_GET_COUNTER, PIPE_IOC_RUN, PIPE_IOC_STOP};

    fn device() -> PipeDevice {
        PipeDevice::new(DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = DeviceConfig {
            period_ms: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            PipeDevice::new(config),
            Err(PipeError::Config { .. })
        ));
    }

    #[test]
    fn test_write_then_read() {
        let dev = device();
        assert_eq!(dev.write(b"hello world").unwrap(), 11);
        assert_eq!(dev.read(5).unwrap(), b"hello");
        assert_eq!(dev.pending().unwrap(), 6);
        assert_eq!(dev.read(64).unwrap(), b" world");
    }

    #[test]
    fn test_read_into_caller_buffer() {
        let dev = device();
        dev.write(b"abc").unwrap();
        let mut out = [0u8; 2];
        assert_eq!(dev.read_into(&mut out).unwrap(), 2);
        assert_eq!(&out, b"ab");
    }

    #[test]
    fn test_open_guard_through_device() {
        let dev = device();
        dev.open().unwrap();
        assert!(matches!(dev.open(), Err(PipeError::Busy { .. })));
        dev.close();
        assert!(dev.open().is_ok());
    }

    #[test]
    fn test_ioctl_get_counter_payload() {
        let dev = device();
        assert_eq!(
            dev.ioctl(PIPE_IOC_GET_COUNTER, &[]).unwrap(),
            0i32.to_ne_bytes().to_vec()
        );
    }

    #[test]
    fn test_ioctl_run_stop() {
        let dev = device();
        assert!(dev.ioctl(PIPE_IOC_RUN, &[]).unwrap().is_empty());
        assert!(dev.is_counting());
        dev.ioctl(PIPE_IOC_STOP, &[]).unwrap();
        assert!(!dev.is_counting());
        assert!(dev.counter() >= 1);
    }

    #[test]
    fn test_shutdown_clears_state() {
        let dev = device();
        dev.open().unwrap();
        dev.write(b"pending").unwrap();
        dev.control(ControlCommand::Run).unwrap();
        dev.shutdown().unwrap();

        assert_eq!(dev.pending().unwrap(), 0);
        assert!(!dev.is_counting());
        assert!(!dev.is_open());
    }
}
