use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".pr-watcher.toml";
const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_WEB_URL: &str = "https://github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration as read from `.pr-watcher.toml`.
///
/// Every field is optional. Values the file leaves out come from the
/// environment or from defaults; CLI flags are layered on top in `main`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub setup: SetupConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// Login of the automation actor. Falls back to GITHUB_USER.
    pub username: Option<String>,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Chat webhook endpoint. Falls back to PR_WATCHER_WEBHOOK_URL.
    pub url: Option<String>,
    /// Sender name shown in the channel
    pub username: Option<String>,
    /// Headline text of every announcement
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    pub interval_secs: Option<u64>,
    pub overlap_secs: Option<u64>,
    pub max_concurrent_records: Option<usize>,
    pub max_consecutive_feed_failures: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    pub enabled: Option<bool>,
    pub branch: Option<String>,
    pub fork_ready_timeout_secs: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

/// Validated runtime settings, built once at startup and passed down by
/// reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub github: GitHubSettings,
    pub webhook: WebhookSettings,
    pub poll: PollSettings,
    pub setup: SetupSettings,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub token: String,
    pub username: String,
    pub api_url: String,
    pub web_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub username: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// How far each window reaches back before the previous watermark
    pub overlap: Duration,
    pub max_concurrent_records: usize,
    pub max_consecutive_feed_failures: u32,
}

#[derive(Debug, Clone)]
pub struct SetupSettings {
    pub enabled: bool,
    /// Login that owns the forks
    pub actor: String,
    pub branch: String,
    pub web_url: String,
    pub fork_ready_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Config {
    /// Load configuration from .pr-watcher.toml in the current directory,
    /// or from `path` when given. A missing default file yields the default
    /// config; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Fill values the file left unset from the environment.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.github.token.is_none() {
            self.github.token = var("GITHUB_TOKEN");
        }
        if self.github.username.is_none() {
            self.github.username = var("GITHUB_USER");
        }
        if self.webhook.url.is_none() {
            self.webhook.url = var("PR_WATCHER_WEBHOOK_URL");
        }
    }

    /// Validate and freeze into [`Settings`].
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let token = required(self.github.token, "github.token")?;
        let username = required(self.github.username, "github.username")?;
        let webhook_url = required(self.webhook.url, "webhook.url")?;
        let api_url = self.github.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let web_url = self
            .github
            .web_url
            .unwrap_or_else(|| DEFAULT_WEB_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        for (field, url) in [
            ("github.api_url", &api_url),
            ("github.web_url", &web_url),
            ("webhook.url", &webhook_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
                field,
                reason: format!("{url:?} is not a URL: {e}"),
            })?;
        }

        let interval = Duration::from_secs(self.poll.interval_secs.unwrap_or(2));
        let overlap = Duration::from_secs(self.poll.overlap_secs.unwrap_or(1));
        if interval.is_zero() {
            return Err(invalid("poll.interval_secs", "must be greater than zero"));
        }
        if overlap >= interval {
            return Err(invalid("poll.overlap_secs", "must be shorter than the poll interval"));
        }

        let max_concurrent_records = self.poll.max_concurrent_records.unwrap_or(4);
        if max_concurrent_records == 0 {
            return Err(invalid("poll.max_concurrent_records", "must be at least 1"));
        }

        let request_timeout = Duration::from_secs(self.github.request_timeout_secs.unwrap_or(30));
        if request_timeout.is_zero() {
            return Err(invalid("github.request_timeout_secs", "must be greater than zero"));
        }

        let initial_backoff = Duration::from_millis(self.setup.initial_backoff_ms.unwrap_or(500));
        let max_backoff = Duration::from_millis(self.setup.max_backoff_ms.unwrap_or(8_000));
        let fork_ready_timeout =
            Duration::from_secs(self.setup.fork_ready_timeout_secs.unwrap_or(120));
        if initial_backoff.is_zero() || max_backoff < initial_backoff {
            return Err(invalid(
                "setup.max_backoff_ms",
                "backoff must be positive and max_backoff_ms >= initial_backoff_ms",
            ));
        }
        if fork_ready_timeout.is_zero() {
            return Err(invalid("setup.fork_ready_timeout_secs", "must be greater than zero"));
        }

        let branch = self
            .setup
            .branch
            .unwrap_or_else(|| "CodeLingo-Setup".to_string());
        if branch.is_empty() || branch.starts_with("refs/") || branch.contains(' ') {
            return Err(invalid("setup.branch", "must be a short branch name without spaces"));
        }

        Ok(Settings {
            github: GitHubSettings {
                token,
                username: username.clone(),
                api_url,
                web_url: web_url.clone(),
                request_timeout,
            },
            webhook: WebhookSettings {
                url: webhook_url,
                username: self.webhook.username.unwrap_or_else(|| "robot".to_string()),
                text: self
                    .webhook
                    .text
                    .unwrap_or_else(|| "There was some activity on a Pull Request".to_string()),
            },
            poll: PollSettings {
                interval,
                overlap,
                max_concurrent_records,
                max_consecutive_feed_failures: self.poll.max_consecutive_feed_failures.unwrap_or(30),
            },
            setup: SetupSettings {
                enabled: self.setup.enabled.unwrap_or(true),
                actor: username,
                branch,
                web_url,
                fork_ready_timeout,
                initial_backoff,
                max_backoff,
            },
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
