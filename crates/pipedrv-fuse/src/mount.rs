//! Mount point validation and option parsing for the pipedrv FUSE mount.

use std::path::Path;
use thiserror::Error;

/// Filesystem name reported to the kernel (visible in `/proc/mounts`).
pub const FS_NAME: &str = "pipedrv";

/// Options accepted by `-o` on the mount command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Let users other than the mounter open the nodes.
    pub allow_other: bool,
    /// Let the mounter and root open the nodes.
    pub allow_root: bool,
    /// Let the kernel enforce the configured file modes.
    pub default_permissions: bool,
    /// Unmount when the daemon exits, even on a crash.
    pub auto_unmount: bool,
    /// Mount read-only; writes to the device node then fail with `EROFS`.
    pub ro: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: false,
            default_permissions: false,
            auto_unmount: true,
            ro: false,
        }
    }
}

/// Errors that can occur while registering the device under a mount point.
#[derive(Debug, Error)]
pub enum MountError {
    /// Mount point does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Mount point is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Unknown or conflicting mount option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Mounting failed in the kernel or fusermount.
    #[error("Mount failed at {mountpoint}: {reason}")]
    MountFailed {
        /// Requested mount point.
        mountpoint: String,
        /// Error reported by the mount call.
        reason: String,
    },

    /// Device state could not be constructed.
    #[error("Device setup failed: {0}")]
    Device(#[from] pipedrv_core::PipeError),
}

/// Checks that `path` is an existing directory.
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(MountError::NotADirectory(path.display().to_string())),
        Err(_) => Err(MountError::PathNotFound(path.display().to_string())),
    }
}

/// Parses a comma-separated `-o` list.
///
/// Accepts allow_other, allow_root, default_permissions, auto_unmount,
/// noauto_unmount, ro and rw. Later entries override earlier ones.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let options = opts_str
        .split(',')
        .map(str::trim)
        .filter(|opt| !opt.is_empty())
        .try_fold(MountOptions::default(), |mut options, opt| {
            match opt {
                "allow_other" => options.allow_other = true,
                "allow_root" => options.allow_root = true,
                "default_permissions" => options.default_permissions = true,
                "auto_unmount" => options.auto_unmount = true,
                "noauto_unmount" => options.auto_unmount = false,
                "ro" => options.ro = true,
                "rw" => options.ro = false,
                other => return Err(MountError::InvalidOption(other.to_string())),
            }
            Ok(options)
        })?;

    if options.allow_other && options.allow_root {
        return Err(MountError::InvalidOption(
            "allow_other and allow_root are mutually exclusive".into(),
        ));
    }
    Ok(options)
}

/// Translates [`MountOptions`] into the `fuser` mount option list.
pub fn options_to_fuser(opts: &MountOptions) -> Vec<fuser::MountOption> {
    use fuser::MountOption;

    let flags = [
        (opts.allow_other, MountOption::AllowOther),
        (opts.allow_root, MountOption::AllowRoot),
        (opts.default_permissions, MountOption::DefaultPermissions),
        (opts.auto_unmount, MountOption::AutoUnmount),
    ];

    let mut fuser_opts = vec![MountOption::FSName(FS_NAME.into())];
    fuser_opts.extend(flags.into_iter().filter(|(on, _)| *on).map(|(_, opt)| opt));
    fuser_opts.push(if opts.ro {
        MountOption::RO
    } else {
        MountOption::RW
    });
    // The device node carries no executable or setuid semantics.
    fuser_opts.extend([MountOption::NoExec, MountOption::NoSuid]);
    fuser_opts
}
