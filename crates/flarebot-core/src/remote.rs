//! Collaborator traits for the chat platform, issue tracker and document
//! service.
//!
//! The engine only ever talks to the outside world through these traits.
//! `flarebot-api` provides the production implementations; the
//! [`testing`](crate::testing) module provides recording fakes.
//!
//! The chat surface is split by concern: [`ChatSender`] is all the outbound
//! queue needs, [`ConversationAdmin`] is all the sweep needs, and
//! [`ChatWorkspace`] covers the lookups and setup the incident workflow does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A conversation as listed by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Platform channel ID (e.g. `C0123456`).
    pub id: String,
    /// Channel name without the leading `#`.
    pub name: String,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub is_archived: bool,
}

/// One page of a conversation listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPage {
    pub channels: Vec<ChannelRecord>,
    /// Cursor for the next page; empty when this is the last page.
    pub next_cursor: String,
}

/// A pinned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedMessage {
    pub text: String,
    /// User ID of whoever posted the pinned message.
    pub author_id: String,
}

/// Profile of a chat user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub real_name: String,
    /// May be empty for bots and guests.
    pub email: String,
}

/// An issue-tracker ticket. Never mutated locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticket {
    /// Ticket key, e.g. `FLARE-123`.
    pub key: String,
    /// Browser URL of the ticket.
    pub url: String,
    pub project_id: String,
    pub project_key: String,
    pub summary: String,
    /// Assignee email, if assigned.
    pub assignee: Option<String>,
    pub labels: Vec<String>,
}

impl Ticket {
    /// Returns `true` if the ticket already carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// A user account in the issue tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerUser {
    pub account_id: String,
    pub email: String,
    pub display_name: String,
}

/// A document or spreadsheet in the document service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doc {
    pub id: String,
    pub url: String,
}

/// Outbound chat operations performed by the single sender task.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Posts `text` to `channel`.
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), CoreError>;

    /// Pins the most recent message in `channel` whose text equals `text`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::PinTargetNotFound` when no recent message matches.
    async fn pin_by_text(&self, channel: &str, text: &str) -> Result<(), CoreError>;
}

/// Channel enumeration and archival, as used by the sweep.
#[async_trait]
pub trait ConversationAdmin: Send + Sync {
    /// Lists non-archived public channels, one page at a time.
    ///
    /// An empty `cursor` requests the first page.
    async fn list_conversations(
        &self,
        page_size: u32,
        cursor: &str,
    ) -> Result<ConversationPage, CoreError>;

    /// Archives a channel.
    ///
    /// # Errors
    ///
    /// `ChatApi("not_in_channel")` when the bot is not a member and
    /// `ChatApi("already_archived")` when there is nothing to do.
    async fn archive_conversation(&self, channel_id: &str) -> Result<(), CoreError>;

    /// Joins a channel so it can be archived.
    async fn join_conversation(&self, channel_id: &str) -> Result<(), CoreError>;
}

/// Channel setup and lookups used by the incident workflow.
#[async_trait]
pub trait ChatWorkspace: Send + Sync {
    /// Creates a public channel and returns its record.
    async fn create_channel(&self, name: &str) -> Result<ChannelRecord, CoreError>;

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<(), CoreError>;

    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelRecord, CoreError>;

    async fn list_pins(&self, channel_id: &str) -> Result<Vec<PinnedMessage>, CoreError>;

    async fn user_info(&self, user_id: &str) -> Result<UserProfile, CoreError>;
}

/// Issue-tracker operations.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Fetches a ticket by key.
    ///
    /// # Errors
    ///
    /// Returns an error for which [`CoreError::is_not_found`] holds when no
    /// such ticket exists.
    async fn get_ticket_by_key(&self, key: &str) -> Result<Ticket, CoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<TrackerUser, CoreError>;

    /// Creates a flare ticket of priority `0..=2` assigned to `assignee`.
    async fn create_ticket(
        &self,
        priority: u8,
        summary: &str,
        assignee: &TrackerUser,
    ) -> Result<Ticket, CoreError>;

    /// Adds `label` to the ticket's labels.
    async fn set_label(&self, key: &str, label: &str) -> Result<(), CoreError>;

    async fn assign_ticket(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError>;

    async fn set_comms_lead(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError>;

    /// Applies the transition whose target status is named `transition`.
    async fn do_transition(&self, key: &str, transition: &str) -> Result<(), CoreError>;

    async fn set_description(&self, key: &str, description: &str) -> Result<(), CoreError>;

    /// Browser URL for a ticket key.
    fn ticket_url(&self, key: &str) -> String;
}

/// Document-service operations.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Copies the template `template_id` into a new document named `title`.
    async fn create_from_template(&self, title: &str, template_id: &str)
    -> Result<Doc, CoreError>;

    /// Returns the document body as HTML.
    async fn get_doc_content(&self, doc_id: &str) -> Result<String, CoreError>;

    /// Replaces the document body with `html`.
    async fn update_doc_content(&self, doc_id: &str, html: &str) -> Result<(), CoreError>;

    /// Grants `role` on the document to everyone in `domain`.
    async fn share_with_domain(&self, doc_id: &str, domain: &str, role: &str)
    -> Result<(), CoreError>;

    /// Appends one row to the first sheet of spreadsheet `doc_id`.
    async fn append_sheet_row(&self, doc_id: &str, values: &[String]) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_detect_existing_label() {
        let ticket = Ticket {
            key: "FLARE-1".into(),
            labels: vec!["archived".into()],
            ..Ticket::default()
        };
        assert!(ticket.has_label("archived"));
        assert!(!ticket.has_label("archive"));
    }

    #[test]
    fn test_should_default_missing_channel_fields() {
        let record: ChannelRecord =
            serde_json::from_str(r#"{"id":"C1","name":"flare-1"}"#).expect("parse");
        assert_eq!(record.created, 0);
        assert!(!record.is_archived);
    }
}
