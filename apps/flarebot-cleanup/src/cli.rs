//! Command-line interface for the channel sweep.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use flarebot_api::{JiraClient, SlackClient};
use flarebot_core::{
    ConversationAdmin, IssueTracker, RetryExecutor, SweepConfig, SweepReport, Sweeper,
};
use tracing::{info, warn};

use crate::config::{self, CleanupConfig};

/// Archive incident channels older than a threshold and label their tickets.
#[derive(Debug, Parser)]
#[command(name = "flarebot-cleanup", version, about)]
pub struct Cli {
    /// Config file (defaults to $FLAREBOT_CONFIG or ~/.flarebot/config.yml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log what would be archived without changing anything.
    #[arg(long)]
    dry_run: bool,

    /// Override `cleanup.age_threshold_days`.
    #[arg(long, value_name = "DAYS")]
    threshold_days: Option<u32>,
}

impl Cli {
    /// Applies command-line overrides on top of the file's sweep settings.
    fn sweep_config(&self, mut config: SweepConfig) -> SweepConfig {
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(days) = self.threshold_days {
            config.age_threshold_days = days;
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        let config = CleanupConfig::load(&path)?;
        let sweep = self.sweep_config(config.cleanup.clone());

        let report = sweep_with(
            Arc::new(SlackClient::new(config.slack.bot_token.clone())),
            Arc::new(JiraClient::new(config.jira.clone())),
            RetryExecutor::new(config.retry.policy()),
            sweep,
        )
        .await?;
        finish(&report)
    }
}

async fn sweep_with(
    chat: Arc<dyn ConversationAdmin>,
    tracker: Arc<dyn IssueTracker>,
    retry: RetryExecutor,
    config: SweepConfig,
) -> Result<SweepReport> {
    let sweeper = Sweeper::new(chat, tracker, retry, config);
    sweeper.run().await.context("Channel listing failed")
}

/// Logs per-channel failures and turns any into a non-zero exit.
fn finish(report: &SweepReport) -> Result<()> {
    for failure in &report.failures {
        warn!(
            channel = failure.channel_name,
            channel_id = failure.channel_id,
            error = failure.error,
            "Channel not cleaned up"
        );
    }
    info!(
        archived = report.archived,
        labeled = report.labeled,
        simulated = report.simulated,
        "Sweep complete"
    );
    if report.failed > 0 {
        bail!("{} of {} matched channels failed", report.failed, report.matched);
    }
    Ok(())
}
