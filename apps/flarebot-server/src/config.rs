//! Server configuration types and loading.
//!
//! [`ServerConfig`] is loaded from `~/.flarebot/config.yml`, or from the path
//! in `FLAREBOT_CONFIG`. Unknown sections are ignored so the cleanup binary
//! can share the same file.

use std::path::{Path, PathBuf};

use flarebot_api::{GoogleConfig, JiraConfig};
use flarebot_core::RetrySettings;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ServerError;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FLAREBOT_CONFIG";

/// Overall deadline for one remote call made from a chat handler.
const HANDLER_DEADLINE_SECS: u64 = 120;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub slack: SlackConfig,

    pub jira: JiraConfig,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default = "default_retry")]
    pub retry: RetrySettings,

    #[serde(default)]
    pub reminders: ReminderConfig,
}

/// Slack tokens and channel conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// App-level token for Socket Mode (`xapp-...`).
    pub app_token: String,

    /// Bot User OAuth Token for Web API calls (`xoxb-...`).
    pub bot_token: String,

    /// The coordination channel where flares are fired.
    pub flares_channel_id: String,

    #[serde(default = "default_flares_channel_name")]
    pub flares_channel_name: String,

    /// Incident channels are named `<prefix><number>`, e.g. `flare-123`.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Optional link posted into every new incident channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Seconds after a flare is fired before nagging for an incident lead.
    pub incident_lead_after_secs: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            incident_lead_after_secs: 600,
        }
    }
}

fn default_flares_channel_name() -> String {
    "flares".to_string()
}

fn default_channel_prefix() -> String {
    "flare-".to_string()
}

fn default_retry() -> RetrySettings {
    RetrySettings {
        deadline_secs: Some(HANDLER_DEADLINE_SECS),
        ..RetrySettings::default()
    }
}

/// Returns the default configuration directory path (`~/.flarebot/`).
///
/// # Errors
///
/// Returns `ServerError::Config` if the `HOME` environment variable is not set.
pub fn default_config_dir() -> Result<PathBuf, ServerError> {
    let home = std::env::var("HOME")
        .map_err(|_| ServerError::Config("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".flarebot"))
}

/// Returns `$FLAREBOT_CONFIG` if set, else `~/.flarebot/config.yml`.
///
/// # Errors
///
/// Returns `ServerError::Config` if neither location can be determined.
pub fn default_config_path() -> Result<PathBuf, ServerError> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(default_config_dir()?.join("config.yml"))
}

impl ServerConfig {
    /// Loads and validates configuration from the given YAML file path.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the file cannot be read, contains
    /// invalid YAML, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("Cannot read config at {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ServerError::Config(format!("Invalid YAML in config at {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates that required fields are present and well-formed.
    fn validate(&self) -> Result<(), ServerError> {
        if !self.slack.app_token.starts_with("xapp-") {
            return Err(ServerError::Config(
                "slack.app_token must start with 'xapp-'".into(),
            ));
        }
        if !self.slack.bot_token.starts_with("xoxb-") {
            return Err(ServerError::Config(
                "slack.bot_token must start with 'xoxb-'".into(),
            ));
        }
        if self.slack.flares_channel_id.is_empty() {
            return Err(ServerError::Config(
                "slack.flares_channel_id must not be empty".into(),
            ));
        }
        if self.slack.channel_prefix.is_empty() {
            return Err(ServerError::Config(
                "slack.channel_prefix must not be empty".into(),
            ));
        }
        if self.jira.origin.is_empty() || self.jira.project_key.is_empty() {
            return Err(ServerError::Config(
                "jira.origin and jira.project_key must be set".into(),
            ));
        }
        if self.jira.priority_ids.len() != 3 {
            return Err(ServerError::Config(format!(
                "jira.priority_ids must list exactly 3 ids (p0, p1, p2), got {}",
                self.jira.priority_ids.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
slack:
  app_token: "xapp-1-A123-456"
  bot_token: "xoxb-789-012"
  flares_channel_id: "C0FLARES"
jira:
  origin: "https://example.atlassian.net"
  username: "bot@example.com"
  password: "secret"
  project_id: "10000"
  project_key: "FLARE"
  issue_type_id: "1"
  priority_ids: ["1", "2", "3"]
  comms_lead_field: "customfield_11405"
google:
  access_token: "ya29.token"
  template_doc_id: "tmpl-doc"
  history_template_id: "tmpl-sheet"
  domain: "example.com"
cleanup:
  age_threshold_days: 90
"#;

    fn config() -> ServerConfig {
        serde_yaml::from_str(FULL).expect("deserialize")
    }

    #[test]
    fn test_should_deserialize_full_config_with_defaults() {
        let config = config();
        assert_eq!(config.slack.flares_channel_id, "C0FLARES");
        assert_eq!(config.slack.flares_channel_name, "flares");
        assert_eq!(config.slack.channel_prefix, "flare-");
        assert!(config.slack.resources_url.is_none());
        assert_eq!(config.jira.priority_ids.len(), 3);
        assert_eq!(config.google.domain, "example.com");
        assert_eq!(config.reminders.incident_lead_after_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_default_retry_to_a_handler_deadline() {
        let config = config();
        assert_eq!(config.retry.deadline_secs, Some(120));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_should_reject_invalid_app_token_prefix() {
        let mut config = config();
        config.slack.app_token = "wrong-prefix".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("xapp-"));
    }

    #[test]
    fn test_should_reject_invalid_bot_token_prefix() {
        let mut config = config();
        config.slack.bot_token = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("xoxb-"));
    }

    #[test]
    fn test_should_reject_missing_flares_channel() {
        let mut config = config();
        config.slack.flares_channel_id = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("flares_channel_id"));
    }

    #[test]
    fn test_should_reject_wrong_priority_count() {
        let mut config = config();
        config.jira.priority_ids.pop();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("priority_ids"));
    }

    #[test]
    fn test_should_load_from_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, FULL).expect("write config");

        let config = ServerConfig::load(&path).expect("load");
        assert_eq!(config.slack.app_token, "xapp-1-A123-456");
        assert_eq!(config.jira.project_key, "FLARE");
    }

    #[test]
    fn test_should_report_invalid_yaml() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, "slack: [unclosed").expect("write config");

        let err = ServerConfig::load(&path).unwrap_err().to_string();
        assert!(err.contains("Invalid YAML"));
    }

    #[test]
    fn test_should_error_on_missing_file() {
        let result = ServerConfig::load(Path::new("/nonexistent/config.yml"));
        assert!(result.unwrap_err().to_string().contains("Cannot read"));
    }
}
