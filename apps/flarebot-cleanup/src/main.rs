//! Flarebot cleanup: archives incident channels older than a threshold and
//! labels their tickets `archived`.
//!
//! Meant to run from cron. Safe to re-run: channels already archived and
//! tickets already labeled are skipped.

mod cli;
mod config;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flarebot_cleanup=info".parse()?)
                .add_directive("flarebot_core=info".parse()?),
        )
        .init();

    Cli::parse().run().await
}
