//! HTTP clients for the services Flarebot talks to.
//!
//! - [`SlackClient`]: Slack Web API, implements the chat traits
//! - [`JiraClient`]: Jira REST API with basic auth, implements [`IssueTracker`]
//! - [`GoogleDocsClient`]: Drive and Sheets APIs, implements [`DocumentService`]
//!
//! Every client maps HTTP and API failures onto [`CoreError`] so the retry
//! executor can classify them: 429 becomes `RateLimited`, transport errors
//! and 5xx become retryable, everything else is returned as-is.
//!
//! [`IssueTracker`]: flarebot_core::IssueTracker
//! [`DocumentService`]: flarebot_core::DocumentService
//! [`CoreError`]: flarebot_core::CoreError

pub mod gdocs;
mod http;
pub mod jira;
pub mod slack;

pub use gdocs::{GoogleConfig, GoogleDocsClient};
pub use jira::{JiraClient, JiraConfig};
pub use slack::{BotIdentity, SlackClient};
