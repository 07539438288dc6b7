//! Cleanup configuration.
//!
//! Reads the same YAML file as the server. Only the sections the sweep needs
//! are parsed; the rest are ignored.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use flarebot_api::JiraConfig;
use flarebot_core::{RetrySettings, SweepConfig};
use serde::Deserialize;
use tracing::info;

pub const CONFIG_ENV: &str = "FLAREBOT_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub slack: SlackTokens,

    pub jira: JiraConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cleanup: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackTokens {
    pub bot_token: String,
}

/// `$FLAREBOT_CONFIG` if set, else `~/.flarebot/config.yml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".flarebot").join("config.yml"))
}

impl CleanupConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config at {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.slack.bot_token.starts_with("xoxb-") {
            bail!("slack.bot_token must start with 'xoxb-'");
        }
        if self.jira.origin.is_empty() {
            bail!("jira.origin must be set");
        }
        if self.cleanup.channel_prefix.is_empty() {
            bail!("cleanup.channel_prefix must not be empty");
        }
        if self.cleanup.page_size == 0 {
            bail!("cleanup.page_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
slack:
  app_token: "xapp-1-A123-456"
  bot_token: "xoxb-789-012"
  flares_channel_id: "C0FLARES"
jira:
  origin: "https://example.atlassian.net"
  username: "bot@example.com"
  password: "secret"
  project_key: "FLARE"
cleanup:
  channel_prefix: "flare-"
  age_threshold_days: 90
"#;

    fn write(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.yml");
        std::fs::write(&path, content).expect("write config");
        (tmp, path)
    }

    #[test]
    fn test_should_load_sweep_settings_and_ignore_server_sections() {
        let (_tmp, path) = write(CONFIG);
        let config = CleanupConfig::load(&path).expect("load");
        assert_eq!(config.slack.bot_token, "xoxb-789-012");
        assert_eq!(config.cleanup.age_threshold_days, 90);
        assert_eq!(config.cleanup.page_size, flarebot_core::sweep::DEFAULT_PAGE_SIZE);
        assert!(!config.cleanup.dry_run);
    }

    #[test]
    fn test_should_run_without_retry_deadline_by_default() {
        let (_tmp, path) = write(CONFIG);
        let config = CleanupConfig::load(&path).expect("load");
        assert_eq!(config.retry.policy().deadline, None);
    }

    #[test]
    fn test_should_default_cleanup_section() {
        let yaml = CONFIG.split("cleanup:").next().unwrap_or_default();
        let (_tmp, path) = write(yaml);
        let config = CleanupConfig::load(&path).expect("load");
        assert_eq!(config.cleanup, SweepConfig::default());
    }

    #[test]
    fn test_should_reject_bad_bot_token() {
        let (_tmp, path) = write(&CONFIG.replace("xoxb-789-012", "nope"));
        let err = CleanupConfig::load(&path).unwrap_err().to_string();
        assert!(err.contains("xoxb-"));
    }

    #[test]
    fn test_should_report_missing_file() {
        let err = CleanupConfig::load(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(err.to_string().contains("Cannot read config"));
    }
}
