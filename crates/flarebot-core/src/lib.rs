//! Flarebot Core Engine
//!
//! The engine behind the incident-response bot. It owns everything that has
//! to stay correct on a noisy, rate-limited network and leaves the concrete
//! Slack, Jira and Google Docs plumbing to `flarebot-api`.
//!
//! # Architecture
//!
//! - [`Router`] maps an inbound [`Message`] to at most one registered handler
//! - [`OutboundHandle`] / [`OutboundReceiver`] serialize every chat post and
//!   pin through a single consumer task
//! - [`RetryExecutor`] runs one remote call with bounded, rate-limit aware retry
//! - [`Sweeper`] walks the paginated channel list and archives stale incident
//!   channels, isolating per-channel failures
//! - [`Reminders`] schedules cancellable "sleep then post" tasks
//! - [`DocIdCache`] remembers which history sheet belongs to which channel
//! - [`remote`] declares the collaborator traits the API clients implement

pub mod doc_cache;
mod error;
pub mod message;
pub mod naming;
pub mod outbound;
pub mod reminder;
pub mod remote;
pub mod retry;
pub mod router;
pub mod sweep;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use doc_cache::DocIdCache;
pub use error::{CoreError, Disposition};
pub use message::{Groups, Message};
pub use naming::{channel_name_for_ticket, incident_key, is_older_than};
pub use outbound::{OutboundAction, OutboundHandle, OutboundReceiver, OutboundStats, QueuedAction};
pub use reminder::Reminders;
pub use remote::{
    ChannelRecord, ChatSender, ChatWorkspace, ConversationAdmin, ConversationPage, Doc,
    DocumentService, IssueTracker, PinnedMessage, Ticket, TrackerUser, UserProfile,
};
pub use retry::{RetryExecutor, RetryPolicy, RetrySettings};
pub use router::{CommandSummary, Router};
pub use sweep::{SweepConfig, SweepFailure, SweepReport, Sweeper};
