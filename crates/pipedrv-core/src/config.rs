//! Device configuration loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::counter::DEFAULT_PERIOD_MS;
use crate::error::{PipeError, Result};

/// Default file name of the device node.
pub const DEFAULT_DEVICE_NAME: &str = "pipe-drv";
/// Default file name of the status file.
pub const DEFAULT_STATUS_NAME: &str = "pipe-drv-proc";

/// Device configuration: file names, initial counter period and ownership of
/// the exposed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// File name of the device node.
    pub device_name: String,
    /// File name of the read-only status file.
    pub status_name: String,
    /// Initial counter period in milliseconds.
    pub period_ms: u64,
    /// Owner of both nodes.
    pub uid: u32,
    /// Group of both nodes.
    pub gid: u32,
    /// Permission bits of both nodes.
    pub mode: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            status_name: DEFAULT_STATUS_NAME.to_string(),
            period_ms: DEFAULT_PERIOD_MS,
            uid: 0,
            gid: 0,
            mode: 0o666,
        }
    }
}

impl DeviceConfig {
    /// Loads and validates a config file; the format follows the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DeviceConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| PipeError::Config {
                msg: e.to_string(),
            })?,
            "json" => serde_json::from_str(&contents).map_err(|e| PipeError::Config {
                msg: e.to_string(),
            })?,
            _ => {
                return Err(PipeError::Config {
                    msg: format!("unsupported config file extension: {}", ext),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects unusable names, a zero period and out-of-range mode bits.
    pub fn validate(&self) -> Result<()> {
        for name in [&self.device_name, &self.status_name] {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(PipeError::Config {
                    msg: format!("invalid node name: {:?}", name),
                });
            }
        }
        if self.device_name == self.status_name {
            return Err(PipeError::Config {
                msg: "device and status names must differ".into(),
            });
        }
        if self.period_ms == 0 {
            return Err(PipeError::Config {
                msg: "period_ms must be positive".into(),
            });
        }
        if self.mode > 0o7777 {
            return Err(PipeError::Config {
                msg: format!("mode out of range: {:o}", self.mode),
            });
        }
        Ok(())
    }
}
