//! Full-history mirroring between two remotes.
//!
//! [`MirrorTransport`] is the seam between the orchestrator and whatever
//! actually moves refs. [`GitBinaryTransport`] drives the `git` CLI;
//! [`InMemoryTransport`](super::fake::InMemoryTransport) is the in-process
//! stand-in used by tests.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::process;
use super::remote_url::{redact_secrets, Remote};
use super::workspace::Workspace;
use crate::config::Credentials;
use crate::errors::{MirrorStage, TransportError};

/// Moves every ref of one repository to another.
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    /// Mirror-clone `source` into `dest`, which must not exist yet.
    async fn clone_mirror(&self, source: &Remote, dest: &Path) -> Result<(), TransportError>;

    /// Mirror-push the local mirror at `local` to `target`.
    async fn push_mirror(&self, local: &Path, target: &Remote) -> Result<(), TransportError>;
}

/// Clone `source` and push it to `target` inside a fresh task-scoped directory.
///
/// `on_stage` is called right before each half starts. The directory is
/// removed when this future completes or is dropped.
pub async fn mirror(
    transport: &dyn MirrorTransport,
    source: &Remote,
    target: &Remote,
    workspace: &Workspace,
    mut on_stage: impl FnMut(MirrorStage) + Send,
) -> Result<(), TransportError> {
    let dir = workspace.allocate(&source.repo)?;

    on_stage(MirrorStage::Clone);
    transport.clone_mirror(source, dir.path()).await?;

    on_stage(MirrorStage::Push);
    transport.push_mirror(dir.path(), target).await?;

    debug!(source = %source.repo, target = %target.repo, "mirror complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// git CLI
// ---------------------------------------------------------------------------

/// Ref namespaces the hosting platform manages itself and refuses on push.
const HIDDEN_REF_PREFIXES: &[&str] = &["refs/pull/"];

fn auth_failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(authentication failed|could not read username|could not read password|invalid username or password|terminal prompts disabled|returned error: 40[13]|repository not found)",
        )
        .unwrap_or_else(|e| panic!("invalid auth failure pattern: {e}"))
    })
}

/// Whether git's stderr describes a credential problem rather than a blip.
///
/// GitHub answers "Repository not found" when a token cannot see a private
/// repository, so that counts as an authentication failure too.
pub fn is_auth_failure(stderr: &str) -> bool {
    auth_failure_pattern().is_match(stderr)
}

/// [`MirrorTransport`] backed by the local `git` binary.
#[derive(Clone)]
pub struct GitBinaryTransport {
    binary: String,
    secrets: Vec<String>,
}

impl GitBinaryTransport {
    /// Use `git` from `$PATH`, scrubbing both tokens from any captured output.
    pub fn new(credentials: &Credentials) -> Self {
        Self::with_binary("git", credentials)
    }

    pub fn with_binary(binary: impl Into<String>, credentials: &Credentials) -> Self {
        Self {
            binary: binary.into(),
            secrets: credentials.secrets().iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Verify the binary runs at all. Callers treat failure as fatal.
    pub async fn check_available(&self) -> Result<String, TransportError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(TransportError::BinaryNotFound(self.binary.clone()));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(%version, "git binary available");
        Ok(version)
    }

    fn redact(&self, text: &str) -> String {
        redact_secrets(text, self.secrets.iter().map(String::as_str))
    }

    fn spawn_error(&self, e: std::io::Error) -> TransportError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransportError::BinaryNotFound(self.binary.clone())
        } else {
            TransportError::Io(e)
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate(&mut cmd);
        cmd
    }

    async fn run_git(&self, stage: MirrorStage, args: &[&str]) -> Result<String, TransportError> {
        debug!(cmd = %self.redact(&format!("git {}", args.join(" "))), "running git command");
        let child = self
            .command(args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let output = process::wait_with_output(child).await?;
        self.check_output(stage, output)
    }

    fn check_output(
        &self,
        stage: MirrorStage,
        output: std::process::Output,
    ) -> Result<String, TransportError> {
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        let stderr = self.redact(String::from_utf8_lossy(&output.stderr).trim());
        let exit_code = output.status.code().unwrap_or(-1);
        warn!(%stage, exit_code, %stderr, "git command failed");
        if is_auth_failure(&stderr) {
            return Err(TransportError::AuthFailed {
                stage,
                detail: stderr,
            });
        }
        Err(TransportError::CommandFailed {
            stage,
            exit_code,
            stderr,
        })
    }

    /// Delete refs a `push --mirror` to the hosting platform would be refused for.
    async fn prune_hidden_refs(&self, git_dir: &str) -> Result<(), TransportError> {
        let listed = self
            .run_git(
                MirrorStage::Clone,
                &["--git-dir", git_dir, "for-each-ref", "--format=%(refname)"],
            )
            .await?;
        let doomed: Vec<&str> = listed
            .lines()
            .filter(|r| HIDDEN_REF_PREFIXES.iter().any(|p| r.starts_with(p)))
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }

        let script: String = doomed.iter().map(|r| format!("delete {}\n", r)).collect();
        let mut cmd = self.command(&["--git-dir", git_dir, "update-ref", "--stdin"]);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        if let Some(ref mut stdin) = child.stdin {
            stdin.write_all(script.as_bytes()).await?;
        }
        drop(child.stdin.take());
        let output = process::wait_with_output(child).await?;
        self.check_output(MirrorStage::Clone, output)?;
        debug!(count = doomed.len(), "pruned hidden refs");
        Ok(())
    }
}

#[async_trait]
impl MirrorTransport for GitBinaryTransport {
    #[instrument(skip_all, fields(source = %source.repo))]
    async fn clone_mirror(&self, source: &Remote, dest: &Path) -> Result<(), TransportError> {
        let dest_str = dest.to_string_lossy().to_string();
        info!(url = %source.redacted(), "mirror-cloning source");
        self.run_git(
            MirrorStage::Clone,
            &["clone", "--mirror", "--quiet", source.expose_url(), &dest_str],
        )
        .await?;
        self.prune_hidden_refs(&dest_str).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(target = %target.repo))]
    async fn push_mirror(&self, local: &Path, target: &Remote) -> Result<(), TransportError> {
        let dir_str = local.to_string_lossy().to_string();
        info!(url = %target.redacted(), "mirror-pushing to target");
        self.run_git(
            MirrorStage::Push,
            &["--git-dir", &dir_str, "push", "--mirror", "--quiet", target.expose_url()],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepoRef;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    fn refs_of(git_dir: &Path) -> Vec<String> {
        let out = std::process::Command::new("git")
            .args(["--git-dir", git_dir.to_str().unwrap(), "for-each-ref", "--format=%(refname)"])
            .output()
            .unwrap();
        let mut refs: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        refs.sort();
        refs
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure(
            "remote: Invalid username or password.\nfatal: Authentication failed for 'https://***@github.com/a/b.git/'"
        ));
        assert!(is_auth_failure(
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled"
        ));
        assert!(is_auth_failure(
            "fatal: unable to access '...': The requested URL returned error: 403"
        ));
        assert!(is_auth_failure("remote: Repository not found."));
        assert!(!is_auth_failure(
            "fatal: unable to access '...': Could not resolve host: github.com"
        ));
        assert!(!is_auth_failure("error: RPC failed; curl 56 GnuTLS recv error"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent() {
        let transport =
            GitBinaryTransport::with_binary("git-does-not-exist-here", &Credentials::new("a", "b"));
        let err = transport.check_available().await.unwrap_err();
        assert!(matches!(err, TransportError::BinaryNotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_mirror_between_local_repositories() {
        if !git_available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let scratch = tempfile::tempdir().unwrap();

        let work = scratch.path().join("seed");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "--quiet", "--initial-branch=main"]);
        std::fs::write(work.join("README"), "hello").unwrap();
        git(&work, &["add", "README"]);
        git(&work, &["commit", "--quiet", "-m", "initial"]);
        git(&work, &["branch", "release"]);
        git(&work, &["tag", "v1.0"]);
        git(&work, &["update-ref", "refs/pull/1/head", "HEAD"]);

        let target_dir = scratch.path().join("target.git");
        git(scratch.path(), &["init", "--quiet", "--bare", "target.git"]);

        let source_repo = RepoRef::parse("acme/billing").unwrap();
        let target_repo = RepoRef::parse("newco/billing").unwrap();
        let source = Remote::plain(&source_repo, work.join(".git").to_string_lossy());
        let target = Remote::plain(&target_repo, target_dir.to_string_lossy());

        let workspace = Workspace::new(scratch.path().join("work"));
        workspace.prepare().unwrap();
        let transport = GitBinaryTransport::new(&Credentials::new("s", "t"));

        let mut stages = Vec::new();
        mirror(&transport, &source, &target, &workspace, |s| stages.push(s))
            .await
            .unwrap();

        assert_eq!(stages, vec![MirrorStage::Clone, MirrorStage::Push]);
        assert_eq!(
            refs_of(&target_dir),
            vec!["refs/heads/main", "refs/heads/release", "refs/tags/v1.0"]
        );
        assert_eq!(workspace.in_use(), 0);
        assert!(!scratch.path().join("work/acme__billing.git").exists());
    }

    #[tokio::test]
    async fn test_failed_clone_is_transient_and_cleans_up() {
        if !git_available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let scratch = tempfile::tempdir().unwrap();
        let repo = RepoRef::parse("acme/missing").unwrap();
        let source = Remote::plain(&repo, scratch.path().join("nope.git").to_string_lossy());
        let target = Remote::plain(&repo, scratch.path().join("also-nope.git").to_string_lossy());

        let workspace = Workspace::new(scratch.path().join("work"));
        workspace.prepare().unwrap();
        let transport = GitBinaryTransport::new(&Credentials::new("s", "t"));

        let err = mirror(&transport, &source, &target, &workspace, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::CommandFailed {
                stage: MirrorStage::Clone,
                ..
            }
        ));
        assert!(err.is_transient());
        assert_eq!(workspace.in_use(), 0);
        assert!(!scratch.path().join("work/acme__missing.git").exists());
    }
}
