//! Target repository provisioning through the GitHub REST API.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::errors::ResolveError;
use crate::models::{Provisioned, RepoRef};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Makes sure a target repository exists, idempotently.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// Create `repo` in its organization, or confirm it already exists.
    async fn ensure_repository(
        &self,
        repo: &RepoRef,
        private: bool,
    ) -> Result<Provisioned, ResolveError>;
}

/// Asynchronous GitHub REST API client bound to one token.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ResolveError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("repomigrate/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token: token.into(),
        })
    }
}

#[async_trait]
impl RepositoryResolver for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn ensure_repository(
        &self,
        repo: &RepoRef,
        private: bool,
    ) -> Result<Provisioned, ResolveError> {
        let url = format!("{}/orgs/{}/repos", self.api_url, repo.org);
        let payload = serde_json::json!({
            "name": repo.name,
            "private": private,
            "auto_init": false,
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        let outcome = classify_create_response(status, &headers, &body);
        match &outcome {
            Ok(provisioned) => info!(%provisioned, private, "target repository ready"),
            Err(e) => warn!(status = status.as_u16(), error = %e, "repository creation failed"),
        }
        outcome
    }
}

/// Map a `POST /orgs/{org}/repos` response onto the provisioning contract.
pub fn classify_create_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Result<Provisioned, ResolveError> {
    let code = status.as_u16();
    if status.is_success() {
        return Ok(Provisioned::Created);
    }
    if code == 422 && body.contains("already exists") {
        debug!("name already taken in organization");
        return Ok(Provisioned::AlreadyExists);
    }

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let reset_at = || header("x-ratelimit-reset").unwrap_or("unknown").to_string();

    if code == 429 {
        return Err(ResolveError::RateLimited { reset_at: reset_at() });
    }
    if code == 403
        && (header("x-ratelimit-remaining") == Some("0") || header("retry-after").is_some())
    {
        return Err(ResolveError::RateLimited { reset_at: reset_at() });
    }
    if code == 401 || code == 403 {
        return Err(ResolveError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if status.is_server_error() {
        return Err(ResolveError::ServerError { status: code });
    }

    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ResolveError::ApiError { status: code, body })
}

// ---------------------------------------------------------------------------
// In-memory host
// ---------------------------------------------------------------------------

/// A scripted failure for [`InMemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFailure {
    RateLimited,
    ServerError,
    Forbidden,
}

#[derive(Default)]
struct HostState {
    repos: HashSet<RepoRef>,
    scripted: HashMap<RepoRef, VecDeque<HostFailure>>,
    calls: usize,
    created: usize,
}

/// In-process hosting API used by tests.
#[derive(Default)]
pub struct InMemoryHost {
    state: Mutex<HostState>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `repo` was created before the run.
    pub fn with_existing(self, repo: &RepoRef) -> Self {
        self.lock().repos.insert(repo.clone());
        self
    }

    /// Fail the next `times` calls for `repo`.
    pub fn fail_next(&self, repo: &RepoRef, failure: HostFailure, times: usize) {
        self.lock()
            .scripted
            .entry(repo.clone())
            .or_default()
            .extend(std::iter::repeat(failure).take(times));
    }

    pub fn exists(&self, repo: &RepoRef) -> bool {
        self.lock().repos.contains(repo)
    }

    pub fn repo_count(&self) -> usize {
        self.lock().repos.len()
    }

    /// Total `ensure_repository` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Repositories actually created by calls (not pre-seeded).
    pub fn created(&self) -> usize {
        self.lock().created
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RepositoryResolver for InMemoryHost {
    async fn ensure_repository(
        &self,
        repo: &RepoRef,
        _private: bool,
    ) -> Result<Provisioned, ResolveError> {
        let mut state = self.lock();
        state.calls += 1;
        let scripted = state.scripted.get_mut(repo).and_then(VecDeque::pop_front);
        match scripted {
            Some(HostFailure::RateLimited) => Err(ResolveError::RateLimited {
                reset_at: "unknown".into(),
            }),
            Some(HostFailure::ServerError) => Err(ResolveError::ServerError { status: 502 }),
            Some(HostFailure::Forbidden) => {
                Err(ResolveError::AuthenticationFailed("HTTP 403 Forbidden".into()))
            }
            None if state.repos.insert(repo.clone()) => {
                state.created += 1;
                Ok(Provisioned::Created)
            }
            None => Ok(Provisioned::AlreadyExists),
        }
    }
}
