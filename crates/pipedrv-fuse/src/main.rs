#![warn(missing_docs)]
//! pipedrv mount daemon and control client

use clap::Parser;
use pipedrv_fuse::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    Cli::parse().run().await
}
