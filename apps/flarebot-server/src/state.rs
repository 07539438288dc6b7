//! Shared application state for the flarebot-server.
//!
//! [`AppState`] is the container every command handler captures (as
//! `Arc<AppState>`). It holds the remote collaborators behind their traits,
//! the outbound queue handle, and the in-memory caches. The
//! [`Router`](flarebot_core::Router) lives beside it rather than inside it,
//! since the help command needs to read the registry it is registered in.

use std::sync::Arc;
use std::time::Duration;

use flarebot_core::{
    ChatWorkspace, CoreError, DocIdCache, DocumentService, IssueTracker, OutboundHandle,
    Reminders, RetryExecutor,
};

use crate::config::ServerConfig;

/// Channel conventions and templates the incident commands work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentSettings {
    pub flares_channel_id: String,
    pub flares_channel_name: String,
    pub channel_prefix: String,
    /// Tracker project new flares are filed in.
    pub project_key: String,
    pub template_doc_id: String,
    pub history_template_id: String,
    /// Domain the flare documents are shared with.
    pub domain: String,
    pub resources_url: Option<String>,
    /// Delay before the "nobody is incident lead" reminder.
    pub lead_reminder_after: Duration,
}

impl IncidentSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            flares_channel_id: config.slack.flares_channel_id.clone(),
            flares_channel_name: config.slack.flares_channel_name.clone(),
            channel_prefix: config.slack.channel_prefix.clone(),
            project_key: config.jira.project_key.clone(),
            template_doc_id: config.google.template_doc_id.clone(),
            history_template_id: config.google.history_template_id.clone(),
            domain: config.google.domain.clone(),
            resources_url: config.slack.resources_url.clone(),
            lead_reminder_after: Duration::from_secs(config.reminders.incident_lead_after_secs),
        }
    }
}

/// The remote services the bot drives.
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatWorkspace>,
    pub tracker: Arc<dyn IssueTracker>,
    pub docs: Arc<dyn DocumentService>,
}

/// Shared application state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    remote: Collaborators,
    outbound: OutboundHandle,
    retry: RetryExecutor,
    doc_ids: DocIdCache,
    reminders: Reminders,
    bot_user_id: String,
    settings: IncidentSettings,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("bot_user_id", &self.bot_user_id)
            .field("cached_doc_ids", &self.doc_ids.len())
            .field("pending_reminders", &self.reminders.pending())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        remote: Collaborators,
        outbound: OutboundHandle,
        retry: RetryExecutor,
        bot_user_id: String,
        settings: IncidentSettings,
    ) -> Self {
        let reminders = Reminders::new(outbound.clone());
        Self {
            remote,
            outbound,
            retry,
            doc_ids: DocIdCache::new(),
            reminders,
            bot_user_id,
            settings,
        }
    }

    pub fn chat(&self) -> &dyn ChatWorkspace {
        &*self.remote.chat
    }

    pub fn tracker(&self) -> &dyn IssueTracker {
        &*self.remote.tracker
    }

    pub fn docs(&self) -> &dyn DocumentService {
        &*self.remote.docs
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Channel → history spreadsheet ID.
    pub fn doc_ids(&self) -> &DocIdCache {
        &self.doc_ids
    }

    /// Pending incident-lead reminders, keyed by incident channel ID.
    pub fn reminders(&self) -> &Reminders {
        &self.reminders
    }

    pub fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    pub fn settings(&self) -> &IncidentSettings {
        &self.settings
    }

    /// Queues a post to `channel`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` once shutdown has begun.
    pub fn say(&self, channel: &str, text: impl Into<String>) -> Result<u64, CoreError> {
        self.outbound.post(channel, text)
    }

    /// Queues a pin of the message in `channel` whose text is `text`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` once shutdown has begun.
    pub fn pin(&self, channel: &str, text: impl Into<String>) -> Result<u64, CoreError> {
        self.outbound.pin(channel, text)
    }
}
