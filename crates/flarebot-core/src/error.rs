//! Error types for the Flarebot engine.
//!
//! Defines [`CoreError`] as the error type shared by the engine and the API
//! clients, and [`Disposition`], the retry classification the
//! [`RetryExecutor`](crate::RetryExecutor) acts on.

use std::time::Duration;

use thiserror::Error;

/// Chat platform error codes that indicate a temporary server-side problem.
const TRANSIENT_CHAT_ERRORS: &[&str] = &[
    "internal_error",
    "fatal_error",
    "service_unavailable",
    "request_timeout",
];

/// Error type for flarebot-core operations.
///
/// # Examples
///
/// ```
/// use flarebot_core::{CoreError, Disposition};
///
/// let err = CoreError::ChatApi("not_in_channel".into());
/// assert!(err.is_chat_error("not_in_channel"));
/// assert_eq!(err.disposition(), Disposition::Fatal);
/// ```
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The remote service mandated a wait before the next attempt.
    #[error("Rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited {
        /// The wait the service asked for.
        retry_after: Duration,
    },

    /// A connection reset, timeout, or other temporary transport failure.
    #[error("Transient error: {0}")]
    Transient(String),

    /// An error code returned by the chat platform (e.g. `not_in_channel`).
    #[error("Chat API error: {0}")]
    ChatApi(String),

    /// A non-success HTTP response from the issue tracker or document service.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected as invalid before or by the remote service.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Pin-by-text found no message with the given text in recent history.
    #[error("No message with text `{text}` in recent history of {channel}")]
    PinTargetNotFound {
        /// Channel that was searched.
        channel: String,
        /// Literal text that was looked for.
        text: String,
    },

    /// The retry deadline would be exceeded by the next wait.
    #[error("Gave up after {}s: {last}", deadline.as_secs())]
    DeadlineExceeded {
        /// The configured overall deadline.
        deadline: Duration,
        /// The last error observed before giving up.
        last: Box<CoreError>,
    },

    /// The outbound queue no longer accepts actions.
    #[error("Outbound queue is closed")]
    QueueClosed,

    /// A command pattern failed to compile.
    #[error("Invalid command pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the retry executor should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Sleep with exponential backoff and try again, consuming an attempt.
    Retry,
    /// Sleep exactly this long and try again without consuming an attempt.
    RateLimited(Duration),
    /// Return the error to the caller immediately.
    Fatal,
}

impl CoreError {
    /// Classifies this error for the retry executor.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RateLimited { retry_after } => Disposition::RateLimited(*retry_after),
            Self::Transient(_) => Disposition::Retry,
            Self::ChatApi(code) if TRANSIENT_CHAT_ERRORS.contains(&code.as_str()) => {
                Disposition::Retry
            }
            Self::Http { status, .. } if *status >= 500 => Disposition::Retry,
            _ => Disposition::Fatal,
        }
    }

    /// Returns `true` if this is a chat platform error with the given code.
    pub fn is_chat_error(&self, code: &str) -> bool {
        matches!(self, Self::ChatApi(c) if c == code)
    }

    /// Returns `true` if the remote entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Http { status: 404, .. })
    }
}
