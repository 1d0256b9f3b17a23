//! Batch orchestrator: a fixed pool of workers draining the task queue.
//!
//! Each task runs strictly in order: provision the target repository, then
//! mirror-clone the source and mirror-push it to the target. Tasks are
//! independent of each other; a failure is recorded on the task and the
//! worker moves on to the next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Credentials, MigrationConfig};
use crate::errors::{MigrationError, MirrorStage};
use crate::git::remote_url::derive_git_base_url;
use crate::git::{mirror, MirrorTransport, Remote, Workspace};
use crate::github::RepositoryResolver;
use crate::models::{MigrationResult, MigrationTask, Provisioned, TaskStatus};
use crate::rate_limit::ApiRateLimiter;

type TaskQueue = Arc<Mutex<VecDeque<MigrationTask>>>;

/// How often a backoff sleep checks for a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Exponential backoff with a per-task retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient failures tolerated before the task fails.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Knobs the orchestrator needs from the configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub task_timeout: Duration,
    /// Visibility of repositories created on the target.
    pub private: bool,
    /// Base for clone and push URLs, e.g. `https://github.com`.
    pub git_base_url: String,
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            workers: config.migration.workers,
            task_timeout: config.migration.task_timeout(),
            private: config.migration.private,
            git_base_url: derive_git_base_url(
                &config.github.api_url,
                config.github.git_base_url.as_deref(),
            ),
            retry: RetryPolicy {
                max_retries: config.migration.max_retries,
                base_delay: Duration::from_millis(config.retry.base_delay_ms),
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
            },
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            task_timeout: Duration::from_secs(1800),
            private: true,
            git_base_url: "https://github.com".into(),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs a batch of migration tasks over a bounded worker pool.
///
/// Cheap to clone; every worker holds its own clone.
#[derive(Clone)]
pub struct Orchestrator {
    resolver: Arc<dyn RepositoryResolver>,
    transport: Arc<dyn MirrorTransport>,
    limiter: Arc<ApiRateLimiter>,
    workspace: Workspace,
    credentials: Arc<Credentials>,
    settings: Arc<OrchestratorSettings>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn RepositoryResolver>,
        transport: Arc<dyn MirrorTransport>,
        limiter: Arc<ApiRateLimiter>,
        workspace: Workspace,
        credentials: Credentials,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            resolver,
            transport,
            limiter,
            workspace,
            credentials: Arc::new(credentials),
            settings: Arc::new(settings),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned shutdown flag (e.g. one set by a signal handler).
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Handle that stops workers from taking new tasks once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Process every task and return one result per task, ordered by
    /// mapping line.
    ///
    /// Tasks still queued when shutdown is requested come back as skipped.
    pub async fn run(&self, tasks: Vec<MigrationTask>) -> Vec<MigrationResult> {
        let total = tasks.len();
        if total == 0 {
            info!("nothing to migrate");
            return Vec::new();
        }

        let workers = self.settings.workers.clamp(1, total);
        info!(tasks = total, workers, "starting migration batch");

        let queue: TaskQueue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let worker = self.clone();
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            pool.spawn(async move { worker.work(id, queue, tx).await });
        }
        drop(tx);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker terminated abnormally");
            }
        }

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let leftover: Vec<MigrationTask> = lock_queue(&queue).drain(..).collect();
        if !leftover.is_empty() {
            warn!(skipped = leftover.len(), "shutdown requested, queued tasks not started");
        }
        results.extend(leftover.into_iter().map(MigrationResult::cancelled));

        results.sort_by_key(|r| r.line);
        info!(results = results.len(), "migration batch finished");
        results
    }

    async fn work(
        self,
        id: usize,
        queue: TaskQueue,
        results: mpsc::UnboundedSender<MigrationResult>,
    ) {
        loop {
            if self.shutdown_requested() {
                debug!(worker = id, "shutdown requested, worker stopping");
                break;
            }
            let Some(task) = lock_queue(&queue).pop_front() else {
                break;
            };
            let result = self.process(task).await;
            if results.send(result).is_err() {
                break;
            }
        }
        debug!(worker = id, "worker idle");
    }

    #[instrument(skip(self, task), fields(source = %task.source, target = %task.target, line = task.line))]
    async fn process(&self, mut task: MigrationTask) -> MigrationResult {
        let started = Instant::now();
        task.advance(TaskStatus::Resolving);
        info!("provisioning target repository");

        let provisioned = match self.resolve(&mut task).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                error!(error = %e, attempts = task.attempt + 1, "migration failed while provisioning");
                task.fail(e);
                return MigrationResult::finished(task, None, started.elapsed());
            }
        };

        task.advance(TaskStatus::Cloning);
        match self.transfer(&mut task).await {
            Ok(()) => {
                task.advance(TaskStatus::Done);
                info!(%provisioned, attempts = task.attempt + 1, "migration done");
            }
            Err(e) => {
                error!(error = %e, attempts = task.attempt + 1, "migration failed while mirroring");
                task.fail(e);
            }
        }
        MigrationResult::finished(task, Some(provisioned), started.elapsed())
    }

    /// Ensure the target exists, retrying transient failures in place.
    async fn resolve(&self, task: &mut MigrationTask) -> Result<Provisioned, MigrationError> {
        loop {
            self.limiter.acquire().await;
            let call = self
                .resolver
                .ensure_repository(&task.target, self.settings.private);
            let err = match timeout(self.settings.task_timeout, call).await {
                Ok(Ok(provisioned)) => return Ok(provisioned),
                Ok(Err(e)) => MigrationError::from(e),
                Err(_) => MigrationError::Timeout,
            };
            let delay = self.retry_or_give_up(task, err.clone())?;
            if !self.back_off(delay).await {
                return Err(err);
            }
            task.attempt += 1;
            task.advance(TaskStatus::Resolving);
        }
    }

    /// Mirror source to target; a transient failure restarts from a fresh clone.
    async fn transfer(&self, task: &mut MigrationTask) -> Result<(), MigrationError> {
        let base = &self.settings.git_base_url;
        let source = Remote::authenticated(base, &task.source, &self.credentials.source_token);
        let target = Remote::authenticated(base, &task.target, &self.credentials.target_token);

        loop {
            let step = mirror(
                &*self.transport,
                &source,
                &target,
                &self.workspace,
                |stage| {
                    let next = match stage {
                        MirrorStage::Clone => TaskStatus::Cloning,
                        MirrorStage::Push => TaskStatus::Pushing,
                    };
                    task.advance(next);
                    debug!(%stage, "mirror stage started");
                },
            );
            let err = match timeout(self.settings.task_timeout, step).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => MigrationError::from(e),
                Err(_) => MigrationError::Timeout,
            };
            let delay = self.retry_or_give_up(task, err.clone())?;
            if !self.back_off(delay).await {
                return Err(err);
            }
            task.attempt += 1;
        }
    }

    /// Return the backoff delay before the next retry of a transient error,
    /// or the error the task should fail with. The caller counts the retry
    /// once the backoff completes.
    fn retry_or_give_up(
        &self,
        task: &MigrationTask,
        err: MigrationError,
    ) -> Result<Duration, MigrationError> {
        if !err.is_transient() {
            return Err(err);
        }
        if self.shutdown_requested() {
            info!(error = %err, "shutdown requested, not retrying");
            return Err(err);
        }
        let policy = &self.settings.retry;
        if task.attempt >= policy.max_retries {
            return Err(MigrationError::RetriesExhausted {
                attempts: task.attempt + 1,
                last: Box::new(err),
            });
        }
        let retry = task.attempt + 1;
        let delay = policy.delay_for(retry);
        warn!(
            status = %task.status,
            retry,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient failure, retrying"
        );
        Ok(delay)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep out a backoff delay in short slices so a shutdown request
    /// cuts it short. Returns `false` when the task should stop retrying.
    async fn back_off(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.shutdown_requested() {
                info!("shutdown requested during backoff, not retrying");
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL)).await;
        }
    }
}

fn lock_queue(queue: &TaskQueue) -> std::sync::MutexGuard<'_, VecDeque<MigrationTask>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_settings_from_config() {
        let toml_str = r#"
[migration]
mapping_file = "repos.txt"
workers = 8
max_retries = 5
task_timeout_secs = 60
private = false

[retry]
base_delay_ms = 250
max_delay_ms = 4000

[github]
api_url = "https://ghe.example.com/api/v3"
"#;
        let config: MigrationConfig = toml::from_str(toml_str).unwrap();
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.task_timeout, Duration::from_secs(60));
        assert!(!settings.private);
        assert_eq!(settings.git_base_url, "https://ghe.example.com");
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.retry.max_delay, Duration::from_millis(4000));
    }
}
