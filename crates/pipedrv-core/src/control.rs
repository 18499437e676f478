//! Control channel dispatcher.
//!
//! Applies validated [`ControlCommand`]s to the shared counter state and owns
//! the handle of the running counter task, if any. STOP detaches the task from
//! its slot before waiting for it, so only the caller of STOP blocks while the
//! task finishes its current period.

use std::sync::{Arc, Mutex};

use crate::cancel::CancelReason;
use crate::counter::{CounterState, CounterTask};
use crate::error::{PipeError, Result};
use crate::ioctl::{encode_counter, ControlCommand};

/// Result of a successfully applied command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// Nothing to copy back to the caller.
    Done,
    /// Counter value for GET_COUNTER.
    Counter(u64),
}

impl ControlReply {
    /// Output payload for the ioctl reply.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ControlReply::Done => Vec::new(),
            ControlReply::Counter(value) => encode_counter(*value).to_vec(),
        }
    }
}

/// Applies control commands and owns the counter task slot.
pub struct ControlDispatcher {
    state: Arc<CounterState>,
    task: Mutex<Option<CounterTask>>,
}

impl ControlDispatcher {
    /// Creates an idle dispatcher over `state`.
    pub fn new(state: Arc<CounterState>) -> Self {
        Self {
            state,
            task: Mutex::new(None),
        }
    }

    /// Counter value and period shared with the task.
    pub fn state(&self) -> &Arc<CounterState> {
        &self.state
    }

    /// Decodes a raw command word and applies it.
    pub fn dispatch_raw(&self, cmd: u32, in_data: &[u8]) -> Result<ControlReply> {
        let command = ControlCommand::decode(cmd, in_data).inspect_err(|e| {
            tracing::warn!("Rejected control command {:#010x}: {}", cmd, e);
        })?;
        self.dispatch(command)
    }

    /// Applies an already decoded command.
    pub fn dispatch(&self, command: ControlCommand) -> Result<ControlReply> {
        tracing::debug!("Control command: {}", command.name());
        match command {
            ControlCommand::SetPeriod { period_ms } => {
                if period_ms == 0 {
                    return Err(PipeError::InvalidArgument {
                        msg: "period must be positive".into(),
                    });
                }
                self.state.set_period_ms(period_ms);
                tracing::info!("Counter period set to {}ms", period_ms);
                Ok(ControlReply::Done)
            }
            ControlCommand::GetCounter => Ok(ControlReply::Counter(self.state.value())),
            ControlCommand::Run => {
                self.run()?;
                Ok(ControlReply::Done)
            }
            ControlCommand::Stop => {
                self.stop(CancelReason::StopRequested)?;
                Ok(ControlReply::Done)
            }
        }
    }

    /// Starts the counter task unless one is already running.
    pub fn run(&self) -> Result<()> {
        let mut slot = self.lock_task()?;
        if let Some(task) = slot.as_ref() {
            if !task.is_finished() {
                tracing::debug!("RUN ignored, counter task already running");
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            stale.stop(CancelReason::StopRequested);
        }
        *slot = Some(CounterTask::spawn(self.state.clone())?);
        Ok(())
    }

    /// Stops the counter task and waits for it to exit. No-op when idle.
    pub fn stop(&self, reason: CancelReason) -> Result<()> {
        let taken = self.lock_task()?.take();
        match taken {
            Some(task) => task.stop(reason),
            None => tracing::debug!("STOP ignored, no counter task running"),
        }
        Ok(())
    }

    /// Whether a counter task is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    fn lock_task(&self) -> Result<std::sync::MutexGuard<'_, Option<CounterTask>>> {
        self.task
            .lock()
            .map_err(|_| PipeError::Poisoned { what: "counter task" })
    }
}

impl Drop for ControlDispatcher {
    fn drop(&mut self) {
        let slot = match self.task.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = slot.take() {
            task.stop(CancelReason::Teardown);
        }
    }
}
