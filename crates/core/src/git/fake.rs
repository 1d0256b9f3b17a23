//! In-process [`MirrorTransport`] for deterministic tests.
//!
//! Source repositories are seeded as ref lists. A clone writes the refs into
//! the scoped directory (so the directory really exists while the task runs)
//! and a push reads them back and stores them under the target. Failures can
//! be scripted per repository and stage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::mirror::MirrorTransport;
use super::remote_url::Remote;
use crate::errors::{MirrorStage, TransportError};
use crate::models::RepoRef;

const REFS_FILE: &str = "packed-refs";

/// A scripted failure for the next call on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    /// Non-zero exit, eligible for retry.
    Transient,
    /// Credential rejected.
    Auth,
    /// Never returns; only a timeout gets the task out.
    Hang,
}

#[derive(Default)]
struct FakeState {
    sources: HashMap<RepoRef, Vec<String>>,
    targets: HashMap<RepoRef, Vec<String>>,
    rejected_tokens: HashSet<String>,
    scripted: HashMap<(RepoRef, MirrorStage), VecDeque<FakeFailure>>,
    clone_dirs: Vec<PathBuf>,
    clones: usize,
    pushes: usize,
}

/// In-memory stand-in for a pair of git hosts.
pub struct InMemoryTransport {
    state: Mutex<FakeState>,
    latency: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            latency: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Make every clone and push take `latency` (tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a source repository with the given refs.
    pub fn add_source(&self, repo: &RepoRef, refs: &[&str]) {
        self.lock()
            .sources
            .insert(repo.clone(), refs.iter().map(|r| r.to_string()).collect());
    }

    /// Any remote URL carrying `token` is refused with an auth failure.
    pub fn reject_token(&self, token: &str) {
        self.lock().rejected_tokens.insert(token.to_string());
    }

    /// Fail the next `times` clones of `source`.
    pub fn fail_clone(&self, source: &RepoRef, failure: FakeFailure, times: usize) {
        self.script(source, MirrorStage::Clone, failure, times);
    }

    /// Fail the next `times` pushes to `target`.
    pub fn fail_push(&self, target: &RepoRef, failure: FakeFailure, times: usize) {
        self.script(target, MirrorStage::Push, failure, times);
    }

    /// Refs currently stored for `target`, if it was ever pushed to.
    pub fn target_refs(&self, target: &RepoRef) -> Option<Vec<String>> {
        self.lock().targets.get(target).cloned()
    }

    /// Every directory a clone was made into, in call order.
    pub fn clone_dirs(&self) -> Vec<PathBuf> {
        self.lock().clone_dirs.clone()
    }

    pub fn clone_count(&self) -> usize {
        self.lock().clones
    }

    pub fn push_count(&self) -> usize {
        self.lock().pushes
    }

    /// Highest number of clone/push calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn script(&self, repo: &RepoRef, stage: MirrorStage, failure: FakeFailure, times: usize) {
        self.lock()
            .scripted
            .entry((repo.clone(), stage))
            .or_default()
            .extend(std::iter::repeat(failure).take(times));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_failure(&self, repo: &RepoRef, stage: MirrorStage) -> Option<FakeFailure> {
        self.lock()
            .scripted
            .get_mut(&(repo.clone(), stage))
            .and_then(VecDeque::pop_front)
    }

    fn token_rejected(&self, remote: &Remote) -> bool {
        let url = remote.expose_url();
        self.lock()
            .rejected_tokens
            .iter()
            .any(|t| url.contains(&format!(":{}@", t)))
    }

    async fn simulate(&self, repo: &RepoRef, stage: MirrorStage) -> Result<(), TransportError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.next_failure(repo, stage) {
            None => Ok(()),
            Some(FakeFailure::Transient) => Err(TransportError::CommandFailed {
                stage,
                exit_code: 128,
                stderr: "fatal: the remote end hung up unexpectedly".into(),
            }),
            Some(FakeFailure::Auth) => Err(auth_failed(stage)),
            Some(FakeFailure::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn auth_failed(stage: MirrorStage) -> TransportError {
    TransportError::AuthFailed {
        stage,
        detail: "remote: Invalid username or password.".into(),
    }
}

#[async_trait]
impl MirrorTransport for InMemoryTransport {
    async fn clone_mirror(&self, source: &Remote, dest: &Path) -> Result<(), TransportError> {
        if self.token_rejected(source) {
            return Err(auth_failed(MirrorStage::Clone));
        }
        self.simulate(&source.repo, MirrorStage::Clone).await?;

        let refs = {
            let mut state = self.lock();
            state.clones += 1;
            state.clone_dirs.push(dest.to_path_buf());
            state.sources.get(&source.repo).cloned()
        };
        let Some(refs) = refs else {
            return Err(TransportError::CommandFailed {
                stage: MirrorStage::Clone,
                exit_code: 128,
                stderr: format!("fatal: repository '{}' does not exist", source.repo),
            });
        };

        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join(REFS_FILE), refs.join("\n"))?;
        Ok(())
    }

    async fn push_mirror(&self, local: &Path, target: &Remote) -> Result<(), TransportError> {
        if self.token_rejected(target) {
            return Err(auth_failed(MirrorStage::Push));
        }
        self.simulate(&target.repo, MirrorStage::Push).await?;

        let contents = std::fs::read_to_string(local.join(REFS_FILE))?;
        let refs: Vec<String> = contents
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let mut state = self.lock();
        state.pushes += 1;
        state.targets.insert(target.repo.clone(), refs);
        Ok(())
    }
}
