use crate::constants::{DEFAULT_USER_AGENT, REDGIFS_API_BASE};
use crate::error::{ArchiverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub output: OutputConfig,
}

/// Two-tier pacing plus the shared request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub request_delay_ms: u64,
    pub batch_size: usize,
    pub batch_delay_secs: u64,
    pub checkpoint_interval: usize,
    pub rate_limit_cooldown_secs: u64,
    /// 0 disables the token bucket and leaves pacing to the delays alone.
    pub requests_per_minute: u64,
    pub workers: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 2_000,
            batch_size: 25,
            batch_delay_secs: 60,
            checkpoint_interval: 5,
            rate_limit_cooldown_secs: 600,
            requests_per_minute: 30,
            workers: 1,
        }
    }
}

impl PacingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    /// Stretch every wait by `factor` for a later retry pass.
    pub fn escalated(&self, factor: f64) -> Self {
        let factor = factor.max(1.0);
        let scale = |value: u64| ((value as f64) * factor).round() as u64;
        Self {
            request_delay_ms: scale(self.request_delay_ms),
            batch_delay_secs: scale(self.batch_delay_secs),
            rate_limit_cooldown_secs: scale(self.rate_limit_cooldown_secs),
            requests_per_minute: if self.requests_per_minute == 0 {
                0
            } else {
                ((self.requests_per_minute as f64 / factor).floor() as u64).max(1)
            },
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// In-pass attempts for a single item (429 cool-downs and transient errors).
    pub max_attempts_per_item: u32,
    /// Retry passes after the original run before an item is quarantined.
    pub max_retry_passes: u32,
    /// Pass N waits `backoff_multiplier^N` times longer than the original run.
    pub backoff_multiplier: f64,
    pub transient_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_item: 3,
            max_retry_passes: 3,
            backoff_multiplier: 2.0,
            transient_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn escalation_factor(&self, pass: u32) -> f64 {
        self.backoff_multiplier.max(1.0).powi(pass as i32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Base URL of the RedGifs v2 API used to resolve watch pages.
    pub redgifs_api: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            redgifs_api: REDGIFS_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    /// Keep HTML/text bodies that came back instead of media as notes.
    pub keep_mismatch_notes: bool,
    pub max_title_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("archive"),
            keep_mismatch_notes: true,
            max_title_len: 80,
        }
    }
}

impl Config {
    /// Load from `path` (or `config.toml`), falling back to defaults when the
    /// file does not exist, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).map_err(|e| {
                ArchiverError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&config_content)?
        } else if path.is_some() {
            return Err(ArchiverError::Config(format!(
                "Config file '{}' does not exist",
                config_path.display()
            )));
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(agent) = std::env::var("ARCHIVER_USER_AGENT") {
            if !agent.trim().is_empty() {
                self.http.user_agent = agent.trim().to_string();
            }
        }
        if let Ok(root) = std::env::var("ARCHIVER_OUTPUT_DIR") {
            if !root.trim().is_empty() {
                self.output.root = PathBuf::from(root.trim());
            }
        }
        if let Ok(delay) = std::env::var("ARCHIVER_REQUEST_DELAY_MS") {
            if let Ok(delay) = delay.trim().parse() {
                self.pacing.request_delay_ms = delay;
            }
        }
    }

    /// Reject settings that would break the pacing or checkpoint guarantees.
    pub fn validate(&self) -> Result<()> {
        let pacing = &self.pacing;
        if pacing.batch_size == 0 {
            return Err(ArchiverError::Config("pacing.batch_size must be at least 1".into()));
        }
        if pacing.checkpoint_interval == 0 || pacing.checkpoint_interval > pacing.batch_size {
            return Err(ArchiverError::Config(format!(
                "pacing.checkpoint_interval must be between 1 and batch_size ({}), got {}",
                pacing.batch_size, pacing.checkpoint_interval
            )));
        }
        if pacing.workers == 0 {
            return Err(ArchiverError::Config("pacing.workers must be at least 1".into()));
        }
        if pacing.rate_limit_cooldown_secs < pacing.batch_delay_secs {
            return Err(ArchiverError::Config(format!(
                "pacing.rate_limit_cooldown_secs ({}) must not be shorter than batch_delay_secs ({})",
                pacing.rate_limit_cooldown_secs, pacing.batch_delay_secs
            )));
        }
        if self.retry.max_attempts_per_item == 0 {
            return Err(ArchiverError::Config(
                "retry.max_attempts_per_item must be at least 1".into(),
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ArchiverError::Config(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(ArchiverError::Config("http.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output.root = root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.pacing.workers, 1);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let config = Config::from_toml_str(
            r#"
            [pacing]
            batch_size = 10
            checkpoint_interval = 2

            [http]
            user_agent = "test-agent"
            "#,
        )
        .unwrap();
        assert_eq!(config.pacing.batch_size, 10);
        assert_eq!(config.pacing.checkpoint_interval, 2);
        assert_eq!(config.pacing.request_delay_ms, 2_000);
        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.retry.max_retry_passes, 3);
    }

    #[test]
    fn checkpoint_interval_larger_than_batch_is_rejected() {
        let mut config = Config::default();
        config.pacing.batch_size = 5;
        config.pacing.checkpoint_interval = 6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("checkpoint_interval"));
    }

    #[test]
    fn cooldown_shorter_than_batch_pause_is_rejected() {
        let mut config = Config::default();
        config.pacing.batch_delay_secs = 120;
        config.pacing.rate_limit_cooldown_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn escalation_stretches_waits_and_shrinks_budget() {
        let pacing = PacingConfig {
            request_delay_ms: 1_000,
            batch_delay_secs: 30,
            rate_limit_cooldown_secs: 300,
            requests_per_minute: 30,
            ..PacingConfig::default()
        };
        let retry = RetryConfig::default();
        let escalated = pacing.escalated(retry.escalation_factor(2));
        assert_eq!(escalated.request_delay_ms, 4_000);
        assert_eq!(escalated.batch_delay_secs, 120);
        assert_eq!(escalated.rate_limit_cooldown_secs, 1_200);
        assert_eq!(escalated.requests_per_minute, 7);
        assert_eq!(escalated.batch_size, pacing.batch_size);
    }
}
