//! TOML-based configuration for repomigrate.
//!
//! Tokens are never written in the file. The `[github]` section names the
//! environment variables that hold them (`*_env` fields) and
//! [`MigrationConfig::resolve_credentials`] reads them at startup into a
//! [`Credentials`] value that lives only in memory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Batch settings.
    pub migration: BatchConfig,

    /// Backoff between retries.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Hosting API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// What to migrate and how hard to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Path to the `source::target` mapping list.
    pub mapping_file: PathBuf,

    /// Root under which task-scoped mirror directories are created.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Number of parallel workers (default 4).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Transient failures tolerated per task before giving up (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for a single step attempt, in seconds (default 1800).
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Create target repositories as private (default true).
    #[serde(default = "default_true")]
    pub private: bool,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("repomigrate")
}
fn default_workers() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_task_timeout() -> u64 {
    1800
}
fn default_true() -> bool {
    true
}

impl BatchConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// Hosting API and credential references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Explicit git base URL; derived from `api_url` when unset.
    #[serde(default)]
    pub git_base_url: Option<String>,

    /// Environment variable holding the source organization token.
    #[serde(default = "default_source_token_env")]
    pub source_token_env: String,

    /// Environment variable holding the target organization token.
    #[serde(default = "default_target_token_env")]
    pub target_token_env: String,

    /// Sustained API request rate shared by all workers.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Requests allowed back to back before throttling kicks in.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_source_token_env() -> String {
    "SOURCE_PAT".into()
}
fn default_target_token_env() -> String {
    "TARGET_PAT".into()
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_burst() -> u32 {
    5
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            git_base_url: None,
            source_token_env: default_source_token_env(),
            target_token_env: default_target_token_env(),
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level or filter directive (default `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Source and target tokens, resolved from the environment.
///
/// Not `Serialize`; `Debug` prints placeholders.
#[derive(Clone)]
pub struct Credentials {
    pub source_token: String,
    pub target_token: String,
}

impl Credentials {
    pub fn new(source_token: impl Into<String>, target_token: impl Into<String>) -> Self {
        Self {
            source_token: source_token.into(),
            target_token: target_token.into(),
        }
    }

    /// Both tokens, for scrubbing command output before it is logged.
    pub fn secrets(&self) -> [&str; 2] {
        [self.source_token.as_str(), self.target_token.as_str()]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("source_token", &"<redacted>")
            .field("target_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl MigrationConfig {
    /// Defaults for every section, migrating the given mapping file.
    pub fn with_mapping_file(mapping_file: impl Into<PathBuf>) -> Self {
        Self {
            migration: BatchConfig {
                mapping_file: mapping_file.into(),
                work_dir: default_work_dir(),
                workers: default_workers(),
                max_retries: default_max_retries(),
                task_timeout_secs: default_task_timeout(),
                private: default_true(),
            },
            retry: RetryConfig::default(),
            github: GitHubConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Load a [`MigrationConfig`] from a TOML file at the given path.
    ///
    /// This does **not** read credentials; call
    /// [`resolve_credentials`](Self::resolve_credentials) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: MigrationConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Read both tokens from the environment variables named in `[github]`.
    ///
    /// A missing or empty variable is fatal: no task can succeed without it.
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        let source = require_env(&self.github.source_token_env, "github.source_token_env")?;
        let target = require_env(&self.github.target_token_env, "github.target_token_env")?;
        debug!("credentials resolved");
        Ok(Credentials::new(source, target))
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migration.mapping_file.as_os_str().is_empty() {
            return Err(invalid("migration.mapping_file", "mapping file path must not be empty"));
        }
        if self.migration.work_dir.as_os_str().is_empty() {
            return Err(invalid("migration.work_dir", "work dir must not be empty"));
        }
        if self.migration.workers == 0 {
            return Err(invalid("migration.workers", "worker count must be > 0"));
        }
        if self.migration.task_timeout_secs == 0 {
            return Err(invalid("migration.task_timeout_secs", "timeout must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                "max delay must be >= base delay",
            ));
        }
        if self.github.api_url.trim().is_empty() {
            return Err(invalid("github.api_url", "API URL must not be empty"));
        }
        if self.github.requests_per_minute == 0 {
            return Err(invalid("github.requests_per_minute", "rate must be > 0"));
        }
        if self.github.burst == 0 {
            return Err(invalid("github.burst", "burst must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn require_env(env_name: &str, field: &str) -> Result<String, ConfigError> {
    match std::env::var(env_name) {
        Ok(val) if !val.trim().is_empty() => {
            debug!(field, env_name, "resolved env var");
            Ok(val.trim().to_string())
        }
        _ => Err(ConfigError::MissingCredential {
            var: env_name.into(),
            field: field.into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[migration]
mapping_file = "/etc/repomigrate/repos.txt"
work_dir = "/tmp/repomigrate"
workers = 8
max_retries = 5
task_timeout_secs = 600
private = false

[retry]
base_delay_ms = 500
max_delay_ms = 8000

[github]
api_url = "https://github.example.com/api/v3"
source_token_env = "OLD_ORG_PAT"
target_token_env = "NEW_ORG_PAT"
requests_per_minute = 30
burst = 2

[log]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: MigrationConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.migration.workers, 8);
        assert_eq!(config.migration.max_retries, 5);
        assert_eq!(config.migration.task_timeout(), Duration::from_secs(600));
        assert!(!config.migration.private);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.github.source_token_env, "OLD_ORG_PAT");
        assert_eq!(config.github.burst, 2);
        assert_eq!(config.log.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_without_file() {
        let config = MigrationConfig::with_mapping_file("repos.txt");
        assert_eq!(config.migration.workers, 4);
        assert_eq!(config.migration.max_retries, 3);
        assert_eq!(config.migration.task_timeout_secs, 1800);
        assert!(config.migration.private);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.source_token_env, "SOURCE_PAT");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = MigrationConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.github.requests_per_minute, 30);
    }

    #[test]
    fn test_file_not_found() {
        let result = MigrationConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[migration]
mapping_file = "repos.txt"
"#;
        let config: MigrationConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.migration.workers, 4);
        assert_eq!(config.migration.max_retries, 3);
        assert_eq!(config.migration.task_timeout_secs, 1800);
        assert!(config.migration.private);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.source_token_env, "SOURCE_PAT");
        assert_eq!(config.github.target_token_env, "TARGET_PAT");
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.migration.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "migration.workers"
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.retry.max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "retry.max_delay_ms"
        ));
    }

    #[test]
    fn test_resolve_credentials() {
        std::env::set_var("TEST_RM_SOURCE", "ghp_source");
        std::env::set_var("TEST_RM_TARGET", "ghp_target");

        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.github.source_token_env = "TEST_RM_SOURCE".into();
        config.github.target_token_env = "TEST_RM_TARGET".into();
        let creds = config.resolve_credentials().unwrap();
        assert_eq!(creds.source_token, "ghp_source");
        assert_eq!(creds.target_token, "ghp_target");

        std::env::remove_var("TEST_RM_SOURCE");
        std::env::remove_var("TEST_RM_TARGET");
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.github.source_token_env = "TEST_RM_DEFINITELY_UNSET".into();
        assert!(matches!(
            config.resolve_credentials(),
            Err(ConfigError::MissingCredential { ref var, .. }) if var == "TEST_RM_DEFINITELY_UNSET"
        ));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("ghp_secret_one", "ghp_secret_two");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("ghp_secret"));
        assert!(shown.contains("<redacted>"));
    }
}
