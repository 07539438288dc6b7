//! Bulk archival of stale incident channels.
//!
//! The [`Sweeper`] walks the paginated channel list, picks channels whose
//! name carries the incident prefix and whose age exceeds the threshold,
//! archives each one and labels its ticket. Every remote call goes through
//! the [`RetryExecutor`]. A failure on one channel is recorded in the
//! [`SweepReport`] and the sweep moves on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::naming::{incident_key, is_older_than};
use crate::remote::{ChannelRecord, ConversationAdmin, IssueTracker};
use crate::retry::RetryExecutor;
use crate::CoreError;

/// Default number of channels requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Label added to the ticket of an archived channel.
pub const ARCHIVED_LABEL: &str = "archived";

/// Sweep parameters, also the `cleanup` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub channel_prefix: String,
    pub age_threshold_days: u32,
    /// Log every mutating step instead of performing it.
    pub dry_run: bool,
    pub page_size: u32,
    pub archived_label: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "flare-".to_string(),
            age_threshold_days: 180,
            dry_run: false,
            page_size: DEFAULT_PAGE_SIZE,
            archived_label: ARCHIVED_LABEL.to_string(),
        }
    }
}

/// A channel whose archive-and-label step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub channel_id: String,
    pub channel_name: String,
    pub error: String,
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Channels returned by the listing.
    pub scanned: usize,
    /// Channels that passed the prefix and age filter.
    pub matched: usize,
    pub archived: usize,
    /// Channels the platform reported as archived already.
    pub already_archived: usize,
    /// Tickets that received the archived label in this run.
    pub labeled: usize,
    /// Matched channels left untouched because of dry-run.
    pub simulated: usize,
    pub failed: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveOutcome {
    Archived,
    AlreadyArchived,
}

/// Runs sweeps against a chat workspace and issue tracker.
pub struct Sweeper {
    chat: Arc<dyn ConversationAdmin>,
    tracker: Arc<dyn IssueTracker>,
    retry: RetryExecutor,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(
        chat: Arc<dyn ConversationAdmin>,
        tracker: Arc<dyn IssueTracker>,
        retry: RetryExecutor,
        config: SweepConfig,
    ) -> Self {
        Self {
            chat,
            tracker,
            retry,
            config,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Sweeps using the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns an error only when a page of the channel listing cannot be
    /// fetched; per-channel failures are reported in the [`SweepReport`].
    pub async fn run(&self) -> Result<SweepReport, CoreError> {
        self.run_at(Utc::now()).await
    }

    /// Sweeps, judging channel age relative to `now`.
    ///
    /// # Errors
    ///
    /// See [`Sweeper::run`].
    #[instrument(skip(self), fields(prefix = %self.config.channel_prefix, dry_run = self.config.dry_run))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        info!(
            threshold_days = self.config.age_threshold_days,
            "Starting channel sweep"
        );
        let mut report = SweepReport::default();
        let mut cursor = String::new();

        loop {
            let page = self
                .retry
                .run("list_conversations", || {
                    self.chat
                        .list_conversations(self.config.page_size, &cursor)
                })
                .await?;
            debug!(channels = page.channels.len(), "Fetched channel page");

            for channel in &page.channels {
                report.scanned += 1;
                self.visit(channel, now, &mut report).await;
            }

            if page.next_cursor.is_empty() {
                break;
            }
            cursor = page.next_cursor;
        }

        info!(
            scanned = report.scanned,
            matched = report.matched,
            archived = report.archived,
            already_archived = report.already_archived,
            labeled = report.labeled,
            simulated = report.simulated,
            failed = report.failed,
            "Channel sweep finished"
        );
        Ok(report)
    }

    async fn visit(&self, channel: &ChannelRecord, now: DateTime<Utc>, report: &mut SweepReport) {
        let Some(key) = incident_key(&channel.name, &self.config.channel_prefix) else {
            return;
        };
        if !is_older_than(channel.created, self.config.age_threshold_days, now) {
            return;
        }
        report.matched += 1;

        if self.config.dry_run {
            info!(
                channel = %channel.name,
                channel_id = %channel.id,
                ticket = %key,
                "Dry run: would archive channel and label ticket"
            );
            report.simulated += 1;
            return;
        }

        match self.archive_and_label(channel, &key, report).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    channel = %channel.name,
                    channel_id = %channel.id,
                    error = %e,
                    "Failed to clean up channel"
                );
                report.failed += 1;
                report.failures.push(SweepFailure {
                    channel_id: channel.id.clone(),
                    channel_name: channel.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn archive_and_label(
        &self,
        channel: &ChannelRecord,
        key: &str,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        match self.archive(channel).await? {
            ArchiveOutcome::Archived => {
                debug!(channel = %channel.name, "Archived channel");
                report.archived += 1;
            }
            ArchiveOutcome::AlreadyArchived => {
                debug!(channel = %channel.name, "Channel was already archived");
                report.already_archived += 1;
            }
        }

        let label = self.config.archived_label.as_str();
        let ticket = self
            .retry
            .run("get_ticket_by_key", || self.tracker.get_ticket_by_key(key))
            .await?;
        if ticket.has_label(label) {
            debug!(ticket = %ticket.key, "Ticket already labeled");
            return Ok(());
        }
        self.retry
            .run("set_label", || self.tracker.set_label(&ticket.key, label))
            .await?;
        report.labeled += 1;
        Ok(())
    }

    /// Archives a channel, joining it first if the platform requires it.
    async fn archive(&self, channel: &ChannelRecord) -> Result<ArchiveOutcome, CoreError> {
        match self.try_archive(&channel.id).await {
            Err(e) if e.is_chat_error("not_in_channel") => {
                debug!(channel = %channel.name, "Joining channel before archiving");
                self.retry
                    .run("join_conversation", || {
                        self.chat.join_conversation(&channel.id)
                    })
                    .await?;
                self.try_archive(&channel.id).await
            }
            other => other,
        }
    }

    async fn try_archive(&self, channel_id: &str) -> Result<ArchiveOutcome, CoreError> {
        match self
            .retry
            .run("archive_conversation", || {
                self.chat.archive_conversation(channel_id)
            })
            .await
        {
            Ok(()) => Ok(ArchiveOutcome::Archived),
            Err(e) if e.is_chat_error("already_archived") => Ok(ArchiveOutcome::AlreadyArchived),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
