//! In-memory fakes of the remote services.
//!
//! Each fake records every call it receives and can be scripted to fail
//! specific operations. They are compiled for this crate's tests and, with
//! the `testing` feature, for downstream crates' tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::remote::{
    ChannelRecord, ChatSender, ChatWorkspace, ConversationAdmin, ConversationPage, Doc,
    DocumentService, IssueTracker, PinnedMessage, Ticket, TrackerUser, UserProfile,
};
use crate::CoreError;

/// User ID the fake chat reports for the bot.
pub const FAKE_BOT_ID: &str = "UBOT";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-operation queue of errors to return before behaving normally.
#[derive(Debug, Default)]
struct FailureScript {
    queued: Mutex<HashMap<String, VecDeque<CoreError>>>,
}

impl FailureScript {
    fn push(&self, op: &str, err: CoreError) {
        lock(&self.queued)
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    fn take(&self, op: &str) -> Result<(), CoreError> {
        match lock(&self.queued).get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A call received by [`FakeChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Post { channel: String, text: String },
    Pin { channel: String, text: String },
    List { cursor: String },
    Archive { channel: String },
    Join { channel: String },
    CreateChannel { name: String },
    SetTopic { channel: String, topic: String },
}

/// Fake chat platform implementing all three chat traits.
///
/// Archive behaves like the real platform: archiving a live channel marks it
/// archived, archiving it again yields `already_archived`. Listing skips
/// archived channels; the cursor is a position in the full channel list.
#[derive(Debug, Default)]
pub struct FakeChat {
    channels: Mutex<Vec<ChannelRecord>>,
    members: Mutex<HashSet<String>>,
    require_membership: Mutex<bool>,
    users: Mutex<HashMap<String, UserProfile>>,
    history: Mutex<HashMap<String, Vec<String>>>,
    pins: Mutex<HashMap<String, Vec<PinnedMessage>>>,
    calls: Mutex<Vec<(Instant, ChatCall)>>,
    failures: FailureScript,
    next_channel: AtomicU64,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel the bot is a member of.
    pub fn with_channel(self, channel: ChannelRecord) -> Self {
        lock(&self.members).insert(channel.id.clone());
        lock(&self.channels).push(channel);
        self
    }

    /// Adds a channel the bot has not joined.
    pub fn with_foreign_channel(self, channel: ChannelRecord) -> Self {
        *lock(&self.require_membership) = true;
        lock(&self.channels).push(channel);
        self
    }

    pub fn with_user(self, profile: UserProfile) -> Self {
        lock(&self.users).insert(profile.id.clone(), profile);
        self
    }

    /// Seeds a pinned message in `channel`.
    pub fn with_pin(self, channel: &str, pin: PinnedMessage) -> Self {
        lock(&self.pins)
            .entry(channel.to_string())
            .or_default()
            .push(pin);
        self
    }

    /// Makes the next call of `op` fail with `err`.
    ///
    /// `op` is one of `post`, `pin`, `list`, `archive`, `join`, `create`,
    /// `topic`, `info`, `pins`, `user`.
    pub fn fail_next(&self, op: &str, err: CoreError) {
        self.failures.push(op, err);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        lock(&self.calls).iter().map(|(_, c)| c.clone()).collect()
    }

    /// Calls with the (tokio) instant they were received.
    pub fn timed_calls(&self) -> Vec<(Instant, ChatCall)> {
        lock(&self.calls).clone()
    }

    /// Number of archive calls issued for `channel`.
    pub fn archive_calls(&self, channel: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ChatCall::Archive { channel: ch } if ch == channel))
            .count()
    }

    /// Texts posted to `channel`, oldest first.
    pub fn posts_in(&self, channel: &str) -> Vec<String> {
        lock(&self.history).get(channel).cloned().unwrap_or_default()
    }

    pub fn is_archived(&self, channel: &str) -> bool {
        lock(&self.channels)
            .iter()
            .any(|c| c.id == channel && c.is_archived)
    }

    fn record(&self, call: ChatCall) {
        lock(&self.calls).push((Instant::now(), call));
    }

    fn find_channel(&self, channel_id: &str) -> Result<ChannelRecord, CoreError> {
        lock(&self.channels)
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| CoreError::ChatApi("channel_not_found".into()))
    }
}

#[async_trait]
impl ChatSender for FakeChat {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), CoreError> {
        self.record(ChatCall::Post {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        self.failures.take("post")?;
        lock(&self.history)
            .entry(channel.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn pin_by_text(&self, channel: &str, text: &str) -> Result<(), CoreError> {
        self.record(ChatCall::Pin {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        self.failures.take("pin")?;
        let posted = lock(&self.history)
            .get(channel)
            .is_some_and(|msgs| msgs.iter().any(|m| m == text));
        if !posted {
            return Err(CoreError::PinTargetNotFound {
                channel: channel.to_string(),
                text: text.to_string(),
            });
        }
        lock(&self.pins)
            .entry(channel.to_string())
            .or_default()
            .push(PinnedMessage {
                text: text.to_string(),
                author_id: FAKE_BOT_ID.to_string(),
            });
        Ok(())
    }
}

#[async_trait]
impl ConversationAdmin for FakeChat {
    async fn list_conversations(
        &self,
        page_size: u32,
        cursor: &str,
    ) -> Result<ConversationPage, CoreError> {
        self.record(ChatCall::List {
            cursor: cursor.to_string(),
        });
        self.failures.take("list")?;

        let offset: usize = if cursor.is_empty() {
            0
        } else {
            cursor
                .parse()
                .map_err(|_| CoreError::ChatApi("invalid_cursor".into()))?
        };
        // Cursors index the full list so archiving mid-sweep does not shift pages.
        let all = lock(&self.channels).clone();
        let end = (offset + page_size.max(1) as usize).min(all.len());
        let channels = all
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .filter(|c| !c.is_archived)
            .cloned()
            .collect();
        let next_cursor = if end < all.len() {
            end.to_string()
        } else {
            String::new()
        };
        Ok(ConversationPage {
            channels,
            next_cursor,
        })
    }

    async fn archive_conversation(&self, channel_id: &str) -> Result<(), CoreError> {
        self.record(ChatCall::Archive {
            channel: channel_id.to_string(),
        });
        self.failures.take("archive")?;

        if *lock(&self.require_membership) && !lock(&self.members).contains(channel_id) {
            return Err(CoreError::ChatApi("not_in_channel".into()));
        }
        let mut channels = lock(&self.channels);
        let channel = channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| CoreError::ChatApi("channel_not_found".into()))?;
        if channel.is_archived {
            return Err(CoreError::ChatApi("already_archived".into()));
        }
        channel.is_archived = true;
        Ok(())
    }

    async fn join_conversation(&self, channel_id: &str) -> Result<(), CoreError> {
        self.record(ChatCall::Join {
            channel: channel_id.to_string(),
        });
        self.failures.take("join")?;
        lock(&self.members).insert(channel_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ChatWorkspace for FakeChat {
    async fn create_channel(&self, name: &str) -> Result<ChannelRecord, CoreError> {
        self.record(ChatCall::CreateChannel {
            name: name.to_string(),
        });
        self.failures.take("create")?;
        if lock(&self.channels).iter().any(|c| c.name == name) {
            return Err(CoreError::ChatApi("name_taken".into()));
        }
        let n = self.next_channel.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ChannelRecord {
            id: format!("CNEW{n}"),
            name: name.to_string(),
            created: 0,
            is_archived: false,
        };
        lock(&self.members).insert(record.id.clone());
        lock(&self.channels).push(record.clone());
        Ok(record)
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<(), CoreError> {
        self.record(ChatCall::SetTopic {
            channel: channel_id.to_string(),
            topic: topic.to_string(),
        });
        self.failures.take("topic")
    }

    async fn conversation_info(&self, channel_id: &str) -> Result<ChannelRecord, CoreError> {
        self.failures.take("info")?;
        self.find_channel(channel_id)
    }

    async fn list_pins(&self, channel_id: &str) -> Result<Vec<PinnedMessage>, CoreError> {
        self.failures.take("pins")?;
        Ok(lock(&self.pins).get(channel_id).cloned().unwrap_or_default())
    }

    async fn user_info(&self, user_id: &str) -> Result<UserProfile, CoreError> {
        self.failures.take("user")?;
        lock(&self.users)
            .get(user_id)
            .cloned()
            .ok_or_else(|| CoreError::ChatApi("user_not_found".into()))
    }
}

// ---------------------------------------------------------------------------
// Issue tracker
// ---------------------------------------------------------------------------

/// A call received by [`FakeTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Get { key: String },
    FindUser { email: String },
    Create { priority: u8, summary: String, assignee: String },
    SetLabel { key: String, label: String },
    Assign { key: String, account_id: String },
    CommsLead { key: String, account_id: String },
    Transition { key: String, name: String },
    Description { key: String, text: String },
}

/// Fake issue tracker over an in-memory ticket map.
#[derive(Debug)]
pub struct FakeTracker {
    project_key: String,
    tickets: Mutex<HashMap<String, Ticket>>,
    users: Mutex<HashMap<String, TrackerUser>>,
    calls: Mutex<Vec<TrackerCall>>,
    failures: FailureScript,
    next_number: AtomicU64,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self::new("FLARE")
    }
}

impl FakeTracker {
    /// Creates a tracker whose new tickets are keyed `<project_key>-<n>`.
    pub fn new(project_key: &str) -> Self {
        Self {
            project_key: project_key.to_string(),
            tickets: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: FailureScript::default(),
            next_number: AtomicU64::new(100),
        }
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        lock(&self.tickets).insert(ticket.key.clone(), ticket);
        self
    }

    pub fn with_user(self, user: TrackerUser) -> Self {
        lock(&self.users).insert(user.email.clone(), user);
        self
    }

    /// Makes the next call of `op` fail with `err`.
    ///
    /// `op` is one of `get`, `find_user`, `create`, `label`, `assign`,
    /// `comms_lead`, `transition`, `description`.
    pub fn fail_next(&self, op: &str, err: CoreError) {
        self.failures.push(op, err);
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        lock(&self.calls).clone()
    }

    pub fn ticket(&self, key: &str) -> Option<Ticket> {
        lock(&self.tickets).get(key).cloned()
    }

    /// Transition names applied to `key`, in order.
    pub fn transitions(&self, key: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TrackerCall::Transition { key: k, name } if k == key => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TrackerCall) {
        lock(&self.calls).push(call);
    }

    fn require(&self, key: &str) -> Result<(), CoreError> {
        if lock(&self.tickets).contains_key(key) {
            Ok(())
        } else {
            Err(CoreError::NotFound(key.to_string()))
        }
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn get_ticket_by_key(&self, key: &str) -> Result<Ticket, CoreError> {
        self.record(TrackerCall::Get {
            key: key.to_string(),
        });
        self.failures.take("get")?;
        self.ticket(key)
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<TrackerUser, CoreError> {
        self.record(TrackerCall::FindUser {
            email: email.to_string(),
        });
        self.failures.take("find_user")?;
        lock(&self.users)
            .get(email)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("tracker user {email}")))
    }

    async fn create_ticket(
        &self,
        priority: u8,
        summary: &str,
        assignee: &TrackerUser,
    ) -> Result<Ticket, CoreError> {
        self.record(TrackerCall::Create {
            priority,
            summary: summary.to_string(),
            assignee: assignee.account_id.clone(),
        });
        self.failures.take("create")?;
        let n = self.next_number.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}-{n}", self.project_key);
        let ticket = Ticket {
            url: self.ticket_url(&key),
            key: key.clone(),
            project_id: "10000".to_string(),
            project_key: self.project_key.clone(),
            summary: summary.to_string(),
            assignee: Some(assignee.email.clone()),
            labels: Vec::new(),
        };
        lock(&self.tickets).insert(key, ticket.clone());
        Ok(ticket)
    }

    async fn set_label(&self, key: &str, label: &str) -> Result<(), CoreError> {
        self.record(TrackerCall::SetLabel {
            key: key.to_string(),
            label: label.to_string(),
        });
        self.failures.take("label")?;
        self.require(key)?;
        if let Some(ticket) = lock(&self.tickets).get_mut(key) {
            if !ticket.has_label(label) {
                ticket.labels.push(label.to_string());
            }
        }
        Ok(())
    }

    async fn assign_ticket(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError> {
        self.record(TrackerCall::Assign {
            key: key.to_string(),
            account_id: user.account_id.clone(),
        });
        self.failures.take("assign")?;
        self.require(key)?;
        if let Some(ticket) = lock(&self.tickets).get_mut(key) {
            ticket.assignee = Some(user.email.clone());
        }
        Ok(())
    }

    async fn set_comms_lead(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError> {
        self.record(TrackerCall::CommsLead {
            key: key.to_string(),
            account_id: user.account_id.clone(),
        });
        self.failures.take("comms_lead")?;
        self.require(key)
    }

    async fn do_transition(&self, key: &str, transition: &str) -> Result<(), CoreError> {
        self.record(TrackerCall::Transition {
            key: key.to_string(),
            name: transition.to_string(),
        });
        self.failures.take("transition")?;
        self.require(key)
    }

    async fn set_description(&self, key: &str, description: &str) -> Result<(), CoreError> {
        self.record(TrackerCall::Description {
            key: key.to_string(),
            text: description.to_string(),
        });
        self.failures.take("description")?;
        self.require(key)
    }

    fn ticket_url(&self, key: &str) -> String {
        format!("https://tracker.test/browse/{key}")
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A call received by [`FakeDocs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocCall {
    Copy { title: String, template_id: String },
    Get { doc_id: String },
    Update { doc_id: String },
    Share { doc_id: String, domain: String, role: String },
    Append { doc_id: String, values: Vec<String> },
}

/// Fake document service.
///
/// Copies of a spreadsheet template are spreadsheets and get a
/// `docs.google.com/spreadsheets/d/…` URL; everything else is a document.
#[derive(Debug, Default)]
pub struct FakeDocs {
    contents: Mutex<HashMap<String, String>>,
    spreadsheets: Mutex<HashSet<String>>,
    rows: Mutex<HashMap<String, Vec<Vec<String>>>>,
    calls: Mutex<Vec<DocCall>>,
    failures: FailureScript,
    next_id: AtomicU64,
}

impl FakeDocs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document with HTML content.
    pub fn with_document(self, id: &str, html: &str) -> Self {
        lock(&self.contents).insert(id.to_string(), html.to_string());
        self
    }

    /// Seeds an empty spreadsheet.
    pub fn with_spreadsheet(self, id: &str) -> Self {
        lock(&self.contents).insert(id.to_string(), String::new());
        lock(&self.spreadsheets).insert(id.to_string());
        self
    }

    /// Makes the next call of `op` fail with `err`.
    ///
    /// `op` is one of `copy`, `get`, `update`, `share`, `append`.
    pub fn fail_next(&self, op: &str, err: CoreError) {
        self.failures.push(op, err);
    }

    pub fn calls(&self) -> Vec<DocCall> {
        lock(&self.calls).clone()
    }

    pub fn content(&self, doc_id: &str) -> Option<String> {
        lock(&self.contents).get(doc_id).cloned()
    }

    pub fn rows(&self, doc_id: &str) -> Vec<Vec<String>> {
        lock(&self.rows).get(doc_id).cloned().unwrap_or_default()
    }

    fn record(&self, call: DocCall) {
        lock(&self.calls).push(call);
    }

    fn require(&self, doc_id: &str) -> Result<(), CoreError> {
        if lock(&self.contents).contains_key(doc_id) {
            Ok(())
        } else {
            Err(CoreError::NotFound(doc_id.to_string()))
        }
    }
}

#[async_trait]
impl DocumentService for FakeDocs {
    async fn create_from_template(&self, title: &str, template_id: &str) -> Result<Doc, CoreError> {
        self.record(DocCall::Copy {
            title: title.to_string(),
            template_id: template_id.to_string(),
        });
        self.failures.take("copy")?;
        let content = self
            .content(template_id)
            .ok_or_else(|| CoreError::NotFound(template_id.to_string()))?;

        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let is_sheet = lock(&self.spreadsheets).contains(template_id);
        let url = if is_sheet {
            lock(&self.spreadsheets).insert(id.clone());
            format!("https://docs.google.com/spreadsheets/d/{id}/edit")
        } else {
            format!("https://docs.google.com/document/d/{id}/edit")
        };
        lock(&self.contents).insert(id.clone(), content);
        Ok(Doc { id, url })
    }

    async fn get_doc_content(&self, doc_id: &str) -> Result<String, CoreError> {
        self.record(DocCall::Get {
            doc_id: doc_id.to_string(),
        });
        self.failures.take("get")?;
        self.content(doc_id)
            .ok_or_else(|| CoreError::NotFound(doc_id.to_string()))
    }

    async fn update_doc_content(&self, doc_id: &str, html: &str) -> Result<(), CoreError> {
        self.record(DocCall::Update {
            doc_id: doc_id.to_string(),
        });
        self.failures.take("update")?;
        self.require(doc_id)?;
        lock(&self.contents).insert(doc_id.to_string(), html.to_string());
        Ok(())
    }

    async fn share_with_domain(&self, doc_id: &str, domain: &str, role: &str) -> Result<(), CoreError> {
        self.record(DocCall::Share {
            doc_id: doc_id.to_string(),
            domain: domain.to_string(),
            role: role.to_string(),
        });
        self.failures.take("share")?;
        self.require(doc_id)
    }

    async fn append_sheet_row(&self, doc_id: &str, values: &[String]) -> Result<(), CoreError> {
        self.record(DocCall::Append {
            doc_id: doc_id.to_string(),
            values: values.to_vec(),
        });
        self.failures.take("append")?;
        self.require(doc_id)?;
        lock(&self.rows)
            .entry(doc_id.to_string())
            .or_default()
            .push(values.to_vec());
        Ok(())
    }
}
