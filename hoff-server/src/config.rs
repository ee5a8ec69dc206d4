//! Daemon configuration, loaded from a JSON file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::queue::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the webhook listener binds on.
    pub port: u16,
    /// Shared secret GitHub signs webhook deliveries with. Falls back to
    /// the `GITHUB_WEBHOOK_SECRET` environment variable when absent.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Personal access token used for comments and permission checks.
    /// Falls back to the `GITHUB_TOKEN` environment variable when absent.
    #[serde(default)]
    pub access_token: Option<String>,
    pub trigger: TriggerConfig,
    /// Capacity of each bounded queue (webhook intake and main logic).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Comment prefix that addresses the bot, e.g. `"@hoffbot"`. A comment
    /// containing the prefix followed by `merge` triggers integration.
    pub comment_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub owner: String,
    pub repository: String,
    /// Target branch pull requests are merged into.
    pub branch: String,
    /// Branch the rebased candidate is pushed to for CI.
    pub test_branch: String,
    /// Local working copy for this project.
    pub checkout: PathBuf,
    /// Path of the persisted project state snapshot.
    pub state_file: PathBuf,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to decode configuration in {}", path.display()))?;
        if config.projects.is_empty() {
            bail!("configuration in {} lists no projects", path.display());
        }
        if config.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        Ok(config)
    }

    /// The webhook secret, from the config file or the environment.
    pub fn webhook_secret(&self) -> Result<String> {
        read_secret(&self.webhook_secret, "GITHUB_WEBHOOK_SECRET")
    }

    /// The API token, from the config file or the environment.
    pub fn access_token(&self) -> Result<String> {
        read_secret(&self.access_token, "GITHUB_TOKEN")
    }
}

fn read_secret(configured: &Option<String>, env_key: &str) -> Result<String> {
    if let Some(value) = configured {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    env::var(env_key).with_context(|| {
        format!("secret is not in the configuration file and {env_key} is not set")
    })
}

impl ProjectConfig {
    /// URL the working copy is cloned from. Pushes authenticate through
    /// the ambient git credential helper.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EXAMPLE: &str = r#"{
        "port": 1979,
        "webhook_secret": "wh-secret",
        "access_token": "gh-token",
        "trigger": { "comment_prefix": "@hoffbot" },
        "projects": [
            {
                "owner": "o",
                "repository": "r",
                "branch": "main",
                "test_branch": "testing",
                "checkout": "/var/lib/hoff/checkouts/o/r",
                "state_file": "/var/lib/hoff/state/o-r.json"
            }
        ]
    }"#;

    #[test]
    fn example_config_parses() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", EXAMPLE).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.port, 1979);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.trigger.comment_prefix, "@hoffbot");
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.webhook_secret().unwrap(), "wh-secret");
        assert_eq!(config.access_token().unwrap(), "gh-token");

        let project = &config.projects[0];
        assert_eq!(project.branch, "main");
        assert_eq!(project.clone_url(), "https://github.com/o/r.git");
    }

    #[test]
    fn missing_projects_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 1979, "trigger": {{ "comment_prefix": "@hoffbot" }}, "projects": [] }}"#
        )
        .unwrap();

        let result = Config::from_file(file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no projects"));
    }

    #[test]
    fn secrets_fall_back_to_the_environment() {
        env::set_var("HOFF_TEST_SECRET", "from-env");
        let result = read_secret(&None, "HOFF_TEST_SECRET").unwrap();
        assert_eq!(result, "from-env");
        env::remove_var("HOFF_TEST_SECRET");
    }

    #[test]
    fn empty_configured_secret_is_treated_as_absent() {
        env::remove_var("HOFF_TEST_SECRET2");
        let result = read_secret(&Some("   ".to_string()), "HOFF_TEST_SECRET2");
        assert!(result.is_err());
    }
}
