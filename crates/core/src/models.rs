//! Domain model types used throughout repomigrate.
//!
//! These types bridge the mapping loader, the orchestrator, and the report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::{MigrationError, ParseError};

// ---------------------------------------------------------------------------
// Repository reference
// ---------------------------------------------------------------------------

/// A well-formed `<org>/<name>` pair.
///
/// Both parts are non-empty and limited to ASCII alphanumerics, `-`, `_` and
/// `.`, so a `RepoRef` can be embedded in URLs and directory names as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoRef {
    pub org: String,
    pub name: String,
}

impl RepoRef {
    /// Validate and build a reference from its two parts.
    pub fn new(org: &str, name: &str) -> Result<Self, ParseError> {
        let org = org.trim();
        let name = name.trim();
        if org.is_empty() || name.is_empty() {
            return Err(ParseError::EmptyField);
        }
        if !is_valid_identifier(org) || !is_valid_identifier(name) {
            return Err(ParseError::InvalidCharacters);
        }
        Ok(Self {
            org: org.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `org/name`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let mut parts = s.trim().split('/');
        let (org, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(name), None) => (org, name),
            (Some(_), None, _) | (None, _, _) => return Err(ParseError::MissingSlash),
            (Some(_), Some(_), Some(_)) => return Err(ParseError::ExtraSlash),
        };
        Self::new(org, name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

fn is_valid_identifier(s: &str) -> bool {
    s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Pipeline position of a single migration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Resolving,
    Cloning,
    Pushing,
    Done,
    Failed,
}

impl TaskStatus {
    /// Whether the orchestrator may move a task from `self` to `next`.
    ///
    /// Retries stay in the same state, so `Resolving → Resolving` etc. are
    /// allowed; `Pushing → Cloning` is the "re-run the mirror from scratch"
    /// edge.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Resolving)
                | (Resolving, Cloning)
                | (Cloning, Cloning)
                | (Cloning, Pushing)
                | (Pushing, Cloning)
                | (Pushing, Done)
                | (Resolving | Cloning | Pushing, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Cloning => write!(f, "Cloning"),
            Self::Pushing => write!(f, "Pushing"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Migration task
// ---------------------------------------------------------------------------

/// One row of work from the mapping list.
#[derive(Debug, Clone)]
pub struct MigrationTask {
    pub source: RepoRef,
    pub target: RepoRef,
    /// 1-based line number in the mapping list.
    pub line: usize,
    pub status: TaskStatus,
    /// Retries consumed so far.
    pub attempt: u32,
    pub last_error: Option<MigrationError>,
}

impl MigrationTask {
    pub fn new(source: RepoRef, target: RepoRef, line: usize) -> Self {
        Self {
            source,
            target,
            line,
            status: TaskStatus::Pending,
            attempt: 0,
            last_error: None,
        }
    }

    /// Move to `next`, ignoring invalid transitions.
    ///
    /// Returns whether the transition happened. A terminal task never moves.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                source = %self.source,
                from = %self.status,
                to = %next,
                "refusing invalid task transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Record a terminal failure.
    pub fn fail(&mut self, error: MigrationError) {
        if self.advance(TaskStatus::Failed) {
            self.last_error = Some(error);
        }
    }
}

// ---------------------------------------------------------------------------
// Provisioning outcome
// ---------------------------------------------------------------------------

/// Successful outcome of ensuring a target repository exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyExists => write!(f, "already exists"),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Final outcome of one task as seen by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Failed,
    /// The run was cancelled before the task was dequeued.
    Skipped,
}

/// Terminal record of one task, sent on the result channel.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub source: RepoRef,
    pub target: RepoRef,
    pub line: usize,
    pub status: TaskStatus,
    pub outcome: Outcome,
    /// Step executions started, including the first one.
    pub attempts: u32,
    pub error: Option<MigrationError>,
    pub provisioned: Option<Provisioned>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl MigrationResult {
    /// Build the result for a task that reached `Done` or `Failed`.
    pub fn finished(task: MigrationTask, provisioned: Option<Provisioned>, elapsed: Duration) -> Self {
        let outcome = if task.status == TaskStatus::Done {
            Outcome::Done
        } else {
            Outcome::Failed
        };
        Self {
            source: task.source,
            target: task.target,
            line: task.line,
            status: task.status,
            outcome,
            attempts: task.attempt + 1,
            error: task.last_error,
            provisioned,
            elapsed,
        }
    }

    /// Build the result for a task that was never dequeued.
    pub fn cancelled(task: MigrationTask) -> Self {
        Self {
            source: task.source,
            target: task.target,
            line: task.line,
            status: task.status,
            outcome: Outcome::Skipped,
            attempts: 0,
            error: None,
            provisioned: None,
            elapsed: Duration::ZERO,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(s: &str) -> RepoRef {
        RepoRef::parse(s).unwrap()
    }

    #[test]
    fn test_repo_ref_parse() {
        let r = repo(" acme/billing ");
        assert_eq!(r.org, "acme");
        assert_eq!(r.name, "billing");
        assert_eq!(r.to_string(), "acme/billing");
    }

    #[test]
    fn test_repo_ref_rejects_malformed() {
        assert_eq!(RepoRef::parse("acme"), Err(ParseError::MissingSlash));
        assert_eq!(RepoRef::parse("a/b/c"), Err(ParseError::ExtraSlash));
        assert_eq!(RepoRef::parse("/billing"), Err(ParseError::EmptyField));
        assert_eq!(RepoRef::parse("acme/ "), Err(ParseError::EmptyField));
        assert_eq!(
            RepoRef::parse("acme/bill ing"),
            Err(ParseError::InvalidCharacters)
        );
        assert_eq!(
            RepoRef::parse("evil@host/x"),
            Err(ParseError::InvalidCharacters)
        );
        assert_eq!(RepoRef::parse("acme/.."), Err(ParseError::InvalidCharacters));
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Resolving));
        assert!(Resolving.can_transition_to(Cloning));
        assert!(Pushing.can_transition_to(Done));
        assert!(Cloning.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Resolving));
        assert!(!Failed.can_transition_to(Resolving));
        assert!(!Resolving.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut task = MigrationTask::new(repo("a/b"), repo("c/d"), 1);
        assert!(task.advance(TaskStatus::Resolving));
        assert!(task.advance(TaskStatus::Cloning));
        assert!(task.advance(TaskStatus::Pushing));
        assert!(task.advance(TaskStatus::Done));
        assert!(!task.advance(TaskStatus::Cloning));
        task.fail(MigrationError::Timeout);
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.last_error.is_none());
    }

    #[test]
    fn test_result_from_failed_task() {
        let mut task = MigrationTask::new(repo("a/b"), repo("c/d"), 3);
        task.advance(TaskStatus::Resolving);
        task.attempt = 2;
        task.fail(MigrationError::Auth("HTTP 401".into()));
        let result = MigrationResult::finished(task, None, Duration::from_millis(5));
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.line, 3);
        assert!(matches!(result.error, Some(MigrationError::Auth(_))));
    }
}
