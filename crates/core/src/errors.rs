//! Error types for the repomigrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type. [`MigrationError`] is the task-level taxonomy the orchestrator
//! records on a [`MigrationTask`](crate::models::MigrationTask).

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Mapping file errors
// ---------------------------------------------------------------------------

/// Batch-level errors from reading the mapping file.
///
/// Individual malformed lines are not errors at this level; they are
/// collected as [`RejectedLine`](crate::mapping::RejectedLine)s.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The mapping file does not exist.
    #[error("mapping file not found: {0}")]
    FileNotFound(String),

    /// The mapping file exists but could not be read (permissions, bad UTF-8).
    #[error("mapping file I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a mapping line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseError {
    #[error("missing delimiter")]
    MissingDelimiter,

    #[error("extra delimiter")]
    ExtraDelimiter,

    #[error("missing slash")]
    MissingSlash,

    #[error("extra slash")]
    ExtraSlash,

    #[error("empty field")]
    EmptyField,

    #[error("invalid characters")]
    InvalidCharacters,
}

// ---------------------------------------------------------------------------
// Repository resolver (hosting API) errors
// ---------------------------------------------------------------------------

/// Errors from the hosting API while provisioning a target repository.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// HTTP-level transport error (connect, TLS, timeout).
    #[error("GitHub HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token is missing, invalid, or lacks permission on the organization.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Primary or secondary rate limit hit.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The API answered with a 5xx status.
    #[error("GitHub server error (HTTP {status})")]
    ServerError { status: u16 },

    /// Any other non-success response.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Network failure reported by a non-HTTP resolver.
    #[error("network error: {0}")]
    Network(String),
}

impl ResolveError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder() && !e.is_decode(),
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ApiError { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Mirror transport errors
// ---------------------------------------------------------------------------

/// Which half of a mirror operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStage {
    Clone,
    Push,
}

impl std::fmt::Display for MirrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clone => write!(f, "clone"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Errors from mirror clone / mirror push.
///
/// Every string carried here has already been passed through
/// [`redact_secrets`](crate::git::remote_url::redact_secrets).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// The remote rejected the credential.
    #[error("git {stage} authentication failed: {detail}")]
    AuthFailed { stage: MirrorStage, detail: String },

    /// A git command exited with a non-zero status.
    #[error("git {stage} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        stage: MirrorStage,
        exit_code: i32,
        stderr: String,
    },

    /// The task-scoped working directory could not be prepared.
    #[error("working directory error at '{path}': {detail}")]
    Workspace { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CommandFailed { .. } | Self::Io(_) | Self::Workspace { .. } => true,
            Self::BinaryNotFound(_) | Self::AuthFailed { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A credential's environment variable is unset or empty.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    MissingCredential { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Task-level taxonomy
// ---------------------------------------------------------------------------

/// The error recorded on a migration task.
///
/// This is a flattened, cloneable view of the subsystem errors: the
/// orchestrator only needs the kind (to decide on a retry) and a redacted
/// message (to report).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// Invalid or forbidden credential. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Hosting API rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Connectivity problem or 5xx from the hosting API.
    #[error("network error: {0}")]
    Network(String),

    /// Non-zero exit from a git mirror operation.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Anything else that needs external intervention.
    #[error("{0}")]
    Permanent(String),

    /// A step exceeded the per-task timeout.
    #[error("timeout")]
    Timeout,

    /// The retry budget was used up; carries the last transient error.
    #[error("retries exhausted after {attempts} attempts (last error: {last})")]
    RetriesExhausted {
        attempts: u32,
        last: Box<MigrationError>,
    },
}

impl MigrationError {
    /// Whether the orchestrator may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::Transport(_) | Self::Timeout
        )
    }

    /// Short kind name used in structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::RateLimited(_) => "rate_limit_error",
            Self::Network(_) => "transient_network_error",
            Self::Transport(_) => "transport_failure",
            Self::Permanent(_) => "permanent_error",
            Self::Timeout => "timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl Serialize for MigrationError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MigrationError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<ResolveError> for MigrationError {
    fn from(err: ResolveError) -> Self {
        let transient = err.is_transient();
        match err {
            ResolveError::AuthenticationFailed(detail) => Self::Auth(detail),
            ResolveError::RateLimited { .. } => Self::RateLimited(err.to_string()),
            other if transient => Self::Network(other.to_string()),
            other => Self::Permanent(other.to_string()),
        }
    }
}

impl From<TransportError> for MigrationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthFailed { .. } => Self::Auth(err.to_string()),
            ref other if other.is_transient() => Self::Transport(other.to_string()),
            other => Self::Permanent(other.to_string()),
        }
    }
}
