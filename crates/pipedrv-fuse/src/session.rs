//! FUSE session management.
//!
//! Registers the pipe device under a mount point and tears it down again.
//! Registration acquires resources in order (device state, filesystem,
//! mount); if any step fails, everything acquired before it is released
//! before the error is returned, so no partially set up device stays live.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipedrv_core::{DeviceConfig, PipeDevice};

use crate::filesystem::PipeFilesystem;
use crate::mount::{options_to_fuser, validate_mountpoint, MountError, MountOptions};

/// Configuration for a FUSE session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Mount point path
    pub mountpoint: PathBuf,
    /// Device configuration
    pub device: DeviceConfig,
    /// Mount options
    pub mount_options: MountOptions,
    /// Attribute and entry cache lifetime handed to the kernel
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::new(),
            device: DeviceConfig::default(),
            mount_options: MountOptions::default(),
            ttl: Duration::from_secs(1),
        }
    }
}

/// Validates a session config
pub fn validate_session_config(config: &SessionConfig) -> Result<(), MountError> {
    if config.mountpoint.as_os_str().is_empty() {
        return Err(MountError::InvalidOption("mountpoint cannot be empty".into()));
    }
    validate_mountpoint(&config.mountpoint)?;
    config.device.validate()?;
    Ok(())
}

/// Builds the device and filesystem for a session without mounting it.
pub fn build_filesystem(config: &SessionConfig) -> Result<PipeFilesystem, MountError> {
    let device = Arc::new(PipeDevice::new(config.device.clone())?);
    Ok(PipeFilesystem::new(device, config.ttl))
}

/// Handle for a mounted pipe device.
/// Dropping this handle unmounts and shuts the device down.
pub struct SessionHandle {
    mountpoint: PathBuf,
    device: Arc<PipeDevice>,
    session: Option<fuser::BackgroundSession>,
}

impl SessionHandle {
    /// Get the mount point path.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Path of the device node inside the mount.
    pub fn device_path(&self) -> PathBuf {
        self.mountpoint.join(&self.device.config().device_name)
    }

    /// Path of the status file inside the mount.
    pub fn status_path(&self) -> PathBuf {
        self.mountpoint.join(&self.device.config().status_name)
    }

    /// The mounted device.
    pub fn device(&self) -> &Arc<PipeDevice> {
        &self.device
    }

    /// Check if the session is still mounted.
    pub fn is_alive(&self) -> bool {
        self.session.is_some()
    }

    /// Unmounts, then stops the counter task and clears the buffer.
    pub fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::info!("Unmounting {}", self.mountpoint.display());
        // BackgroundSession unmounts and joins its thread on drop
        drop(session);
        if let Err(e) = self.device.shutdown() {
            tracing::error!("Device shutdown failed: {}", e);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registers the device and mounts it, unwinding on failure.
pub fn mount(config: &SessionConfig) -> Result<SessionHandle, MountError> {
    validate_session_config(config)?;

    let fs = build_filesystem(config)?;
    let device = fs.device().clone();
    let options = options_to_fuser(&config.mount_options);

    let session = match fuser::spawn_mount2(fs, &config.mountpoint, &options) {
        Ok(session) => session,
        Err(e) => {
            // The filesystem was consumed by the failed mount; release the
            // device it held before reporting.
            if let Err(shutdown_err) = device.shutdown() {
                tracing::error!("Device shutdown after failed mount: {}", shutdown_err);
            }
            return Err(MountError::MountFailed {
                mountpoint: config.mountpoint.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    tracing::info!(
        "{} mounted at {}",
        config.device.device_name,
        config.mountpoint.display()
    );

    Ok(SessionHandle {
        mountpoint: config.mountpoint.clone(),
        device,
        session: Some(session),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default_has_empty_mountpoint() {
        let config = SessionConfig::default();
        assert_eq!(config.mountpoint, PathBuf::new());
        assert_eq!(config.ttl, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_session_config_empty_mountpoint_returns_error() {
        let config = SessionConfig::default();
        let result = validate_session_config(&config);
        assert!(matches!(result, Err(MountError::InvalidOption(_))));
    }

    #[test]
    fn test_validate_session_config_nonexistent_mountpoint_returns_error() {
        let config = SessionConfig {
            mountpoint: PathBuf::from("/nonexistent_path_12345"),
            ..Default::default()
        };
        let result = validate_session_config(&config);
        assert!(matches!(result, Err(MountError::PathNotFound(_))));
    }

    #[test]
    fn test_validate_session_config_rejects_bad_device_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            mountpoint: dir.path().to_path_buf(),
            device: DeviceConfig {
                period_ms: 0,
                ..DeviceConfig::default()
            },
            ..Default::default()
        };
        let result = validate_session_config(&config);
        assert!(matches!(result, Err(MountError::Device(_))));
    }

    #[test]
    fn test_validate_session_config_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            mountpoint: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(validate_session_config(&config).is_ok());
    }

    #[test]
    fn test_build_filesystem_uses_device_config() {
        let config = SessionConfig {
            device: DeviceConfig {
                device_name: "fifo0".into(),
                ..DeviceConfig::default()
            },
            ..Default::default()
        };
        let fs = build_filesystem(&config).unwrap();
        assert_eq!(fs.device().config().device_name, "fifo0");
    }

    #[test]
    fn test_mount_rejects_invalid_config_before_mounting() {
        let config = SessionConfig {
            mountpoint: PathBuf::from("/nonexistent_path_12345"),
            ..Default::default()
        };
        assert!(matches!(mount(&config), Err(MountError::PathNotFound(_))));
    }
}
