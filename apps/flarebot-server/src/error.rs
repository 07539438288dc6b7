//! Error types for the flarebot-server application.
//!
//! [`ServerError`] covers configuration, the Socket Mode transport and
//! envelope parsing. Failures inside command handlers are `anyhow` errors
//! reported back to the channel instead.

use thiserror::Error;

/// Error type for flarebot-server operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// A configuration error (missing or invalid config file/values).
    #[error("Config error: {0}")]
    Config(String),

    /// A WebSocket transport error (connection, read, write).
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A Socket Mode frame that could not be understood.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// An I/O error from file system operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error from `flarebot-core` or one of the API clients.
    #[error(transparent)]
    Core(#[from] flarebot_core::CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_display_config_error() {
        let err = ServerError::Config("token missing".into());
        assert_eq!(err.to_string(), "Config error: token missing");
    }

    #[test]
    fn test_should_display_websocket_error() {
        let err = ServerError::WebSocket("connection refused".into());
        assert_eq!(err.to_string(), "WebSocket error: connection refused");
    }

    #[test]
    fn test_should_convert_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: ServerError = io_err.into();
        assert!(matches!(err, ServerError::Io(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_should_pass_core_errors_through() {
        let err: ServerError = flarebot_core::CoreError::ChatApi("invalid_auth".into()).into();
        assert_eq!(err.to_string(), "Chat API error: invalid_auth");
    }
}
