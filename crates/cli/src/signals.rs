//! Graceful shutdown signal handling for a migration run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use repomigrate_core::git::process;
use tracing::{info, warn};

/// Shared shutdown flag checked by the orchestrator's workers.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Exit status after a second interrupt (128 + SIGINT).
const EXIT_ABORTED: i32 = 130;

/// Create a new shutdown flag and register OS signal handlers.
///
/// On the first SIGTERM or SIGINT (Ctrl+C) the flag is set to `true`:
/// workers stop taking new tasks, pending retries are abandoned and the run
/// ends once in-flight steps finish. A second signal kills running git
/// processes and exits immediately.
pub fn setup_signal_handlers() -> ShutdownFlag {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_clone = flag.clone();

    tokio::spawn(async move {
        let Some(name) = wait_for_signal().await else {
            return;
        };
        info!(signal = name, "finishing in-flight tasks, signal again to abort");
        flag_clone.store(true, Ordering::SeqCst);

        let Some(name) = wait_for_signal().await else {
            return;
        };
        warn!(signal = name, "second signal received, aborting");
        process::terminate_all();
        std::process::exit(EXIT_ABORTED);
    });

    flag
}

/// Wait for SIGINT or SIGTERM and return its name, or `None` when no
/// handler could be registered.
async fn wait_for_signal() -> Option<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => res.ok().map(|_| "SIGINT"),
                    _ = sigterm.recv() => Some("SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, listening for Ctrl+C only");
                tokio::signal::ctrl_c().await.ok().map(|_| "SIGINT")
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some("Ctrl+C"),
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl+C");
                None
            }
        }
    }
}
