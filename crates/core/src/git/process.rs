//! Process-group handling for git subprocesses.
//!
//! `git clone`/`git push` fork transport helpers (`git-remote-https`,
//! `ssh`) that outlive a killed parent. Every git child runs in its own
//! process group and the whole group is killed when the command is abandoned
//! (step timeout, cancelled future) or when the process aborts.

use std::collections::HashSet;
use std::process::Output;
use std::sync::{Mutex, OnceLock};

use tokio::process::{Child, Command};
use tracing::debug;

/// Put the command in a new process group led by the child.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Collect a child's output; if this future is dropped first, the child's
/// whole process group is killed.
pub(crate) async fn wait_with_output(child: Child) -> std::io::Result<Output> {
    let guard = GroupGuard::new(&child);
    let output = child.wait_with_output().await;
    guard.disarm();
    output
}

/// Kill every git process group still running. Used before a hard exit,
/// when destructors will not run.
pub fn terminate_all() {
    let groups: Vec<u32> = live_groups().drain().collect();
    for pgid in groups {
        kill_group(pgid);
    }
}

fn live_groups() -> std::sync::MutexGuard<'static, HashSet<u32>> {
    static GROUPS: OnceLock<Mutex<HashSet<u32>>> = OnceLock::new();
    GROUPS
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn kill_group(pgid: u32) {
    debug!(pgid, "killing git process group");
    #[cfg(unix)]
    unsafe {
        // A negative pid addresses the whole group.
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Kills the group on drop unless disarmed after the child was reaped.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        let pgid = child.id();
        if let Some(pgid) = pgid {
            live_groups().insert(pgid);
        }
        Self { pgid }
    }

    fn disarm(mut self) {
        if let Some(pgid) = self.pgid.take() {
            live_groups().remove(&pgid);
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            if live_groups().remove(&pgid) {
                kill_group(pgid);
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Stdio;
    use std::time::Duration;

    /// Spawn `sh` in its own group; it starts a background `sleep` and
    /// records that helper's pid in `pidfile`.
    fn spawn_parent_with_helper(pidfile: &Path) -> Child {
        let script = format!("sleep 30 & echo $! > '{}'; wait", pidfile.display());
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate(&mut cmd);
        cmd.spawn().unwrap()
    }

    async fn read_pid(pidfile: &Path) -> String {
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(pidfile) {
                if !pid.trim().is_empty() {
                    return pid.trim().to_string();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("helper pid never written to {}", pidfile.display());
    }

    /// Gone or a zombie awaiting its new parent.
    async fn wait_until_dead(pid: &str) -> bool {
        let stat = format!("/proc/{}/stat", pid);
        for _ in 0..100 {
            match std::fs::read_to_string(&stat) {
                Err(_) => return true,
                Ok(s) => {
                    let state = s.rsplit(')').next().unwrap_or("").trim_start();
                    if state.starts_with('Z') || state.starts_with('X') {
                        return true;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_abandoned_command_takes_its_helpers_down() {
        let scratch = tempfile::tempdir().unwrap();
        let pidfile = scratch.path().join("helper.pid");
        let child = spawn_parent_with_helper(&pidfile);

        let waited =
            tokio::time::timeout(Duration::from_millis(500), wait_with_output(child)).await;
        assert!(waited.is_err(), "shell should still be waiting on its helper");

        let helper = read_pid(&pidfile).await;
        assert!(wait_until_dead(&helper).await, "helper {} survived", helper);
    }

    #[tokio::test]
    async fn test_completed_command_is_not_tracked() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut cmd);
        let child = cmd.spawn().unwrap();
        let pgid = child.id().unwrap();

        let output = wait_with_output(child).await.unwrap();
        assert!(output.status.success());
        assert!(!live_groups().contains(&pgid));
    }
}
