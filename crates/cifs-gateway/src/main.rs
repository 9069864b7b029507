#![warn(missing_docs)]

//! CIFS gateway command-line tool

use anyhow::Result;
use clap::Parser;
use cifs_gateway::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("CIFS gateway starting...");

    let cli = Cli::parse();
    tokio::task::spawn_blocking(move || cli.run()).await?
}
