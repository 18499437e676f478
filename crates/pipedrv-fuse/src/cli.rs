//! Command line for mounting the device and driving its control channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipedrv_core::DeviceConfig;

use crate::client::{read_status, DeviceClient};
use crate::mount::parse_mount_options;
use crate::session::{self, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "pipedrv")]
#[command(about = "Bounded byte FIFO device with a counter control channel", long_about = None)]
/// Top-level command line.
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// pipedrv subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the device node and status file, serving until interrupted.
    Mount {
        /// Existing directory to mount on.
        mountpoint: PathBuf,
        /// TOML or JSON device configuration.
        #[arg(short, long, env = "PIPEDRV_CONFIG")]
        config: Option<PathBuf>,
        /// Initial counter period in milliseconds.
        #[arg(long)]
        period_ms: Option<u64>,
        /// Comma-separated FUSE mount options.
        #[arg(short = 'o', long, default_value = "")]
        options: String,
        /// Attribute cache lifetime in milliseconds.
        #[arg(long, default_value = "1000")]
        ttl_ms: u64,
    },
    /// Issue a control command against a mounted device node.
    Ctl {
        /// Path of the device node.
        node: PathBuf,
        /// Command to send.
        #[command(subcommand)]
        cmd: CtlCmd,
    },
    /// Print the counter from a status file.
    Status {
        /// Path of the status file.
        path: PathBuf,
    },
}

/// Control commands accepted by `ctl`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CtlCmd {
    /// Set the counter period.
    SetPeriod {
        /// Period in milliseconds.
        period_ms: i32,
    },
    /// Print the counter.
    Get,
    /// Start counting.
    Run,
    /// Stop counting.
    Stop,
}

impl Cli {
    /// Builds the session configuration for `mount`.
    pub fn session_config(
        mountpoint: &Path,
        config: Option<&Path>,
        period_ms: Option<u64>,
        options: &str,
        ttl_ms: u64,
    ) -> Result<SessionConfig> {
        let mut device = match config {
            Some(path) => DeviceConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DeviceConfig::default(),
        };
        if let Some(period_ms) = period_ms {
            device.period_ms = period_ms;
        }
        device.validate().context("validating device config")?;

        Ok(SessionConfig {
            mountpoint: mountpoint.to_path_buf(),
            device,
            mount_options: parse_mount_options(options).context("parsing mount options")?,
            ttl: Duration::from_millis(ttl_ms),
        })
    }

    /// Runs the parsed subcommand.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Mount {
                ref mountpoint,
                ref config,
                period_ms,
                ref options,
                ttl_ms,
            } => {
                let config = Self::session_config(
                    mountpoint,
                    config.as_deref(),
                    period_ms,
                    options,
                    ttl_ms,
                )?;
                serve(config).await
            }
            Command::Ctl { ref node, ref cmd } => ctl(node, cmd),
            Command::Status { ref path } => {
                let value = read_status(path)
                    .with_context(|| format!("reading status {}", path.display()))?;
                println!("{}", value);
                Ok(())
            }
        }
    }
}

async fn serve(config: SessionConfig) -> Result<()> {
    let mut handle = session::mount(&config)
        .with_context(|| format!("mounting at {}", config.mountpoint.display()))?;

    tracing::info!("Device node: {}", handle.device_path().display());
    tracing::info!("Status file: {}", handle.status_path().display());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!("Interrupted, shutting down");

    handle.shutdown();
    Ok(())
}

fn ctl(node: &Path, cmd: &CtlCmd) -> Result<()> {
    let client =
        DeviceClient::open(node).with_context(|| format!("opening {}", node.display()))?;
    match cmd {
        CtlCmd::SetPeriod { period_ms } => client.set_period(*period_ms)?,
        CtlCmd::Get => println!("{}", client.counter()?),
        CtlCmd::Run => client.run()?,
        CtlCmd::Stop => client.stop()?,
    }
    Ok(())
}
