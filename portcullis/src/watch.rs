//! Hot-reload: watches a policy file for changes and re-applies it after a
//! debounce window, so a burst of writes from an editor or deploy tool
//! collapses into one apply (spec.md §4.8).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use portcullis_shared::errors::PortcullisError;
use tokio::sync::mpsc;

use crate::lifecycle::DaemonState;

/// Run the hot-reload loop for as long as `state.watch_path()` is set.
/// Intended to run as a background task for the daemon's lifetime; it polls
/// `watch_path()` on every debounce tick rather than owning a fixed watch
/// target, so `WatchSet`/`WatchStatus` IPC requests can change or clear the
/// watched file while this loop keeps running.
pub async fn run(state: Arc<DaemonState>) {
    let debounce = Duration::from_millis(state.config.debounce_ms);
    let mut current_watch: Option<(PathBuf, RecommendedWatcher, mpsc::Receiver<()>)> = None;

    loop {
        let desired = state.watch_path();

        match (&current_watch, &desired) {
            (Some((active, _, _)), Some(wanted)) if active == wanted => {}
            _ => {
                current_watch = desired.as_ref().and_then(|path| {
                    start_watcher(path)
                        .ok()
                        .map(|(w, rx)| (path.clone(), w, rx))
                });
            }
        }

        let Some((path, _watcher, rx)) = current_watch.as_mut() else {
            tokio::time::sleep(debounce).await;
            continue;
        };

        tokio::select! {
            event = rx.recv() => {
                if event.is_none() {
                    current_watch = None;
                    continue;
                }
                // Debounce: drain any further events that arrive within the
                // quiet period before reacting.
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}
                reload(&state, path).await;
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                // periodic wakeup to notice watch_path changes
            }
        }
    }
}

fn start_watcher(
    path: &std::path::Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<()>), PortcullisError> {
    let (tx, rx) = mpsc::channel(16);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.try_send(());
        }
    })
    .map_err(|e| PortcullisError::IoError(format!("create file watcher: {e}")))?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| PortcullisError::IoError(format!("watch policy file: {e}")))?;

    Ok((watcher, rx))
}

async fn reload(state: &DaemonState, path: &std::path::Path) {
    let timeout = Duration::from_millis(state.config.mutator_timeout_ms);
    match std::fs::read_to_string(path) {
        Ok(raw) => match crate::policy::validate_raw(&raw, state.config.max_policy_bytes) {
            Ok(policy) => match state.apply(policy, timeout).await {
                Ok(_) => tracing::info!("hot-reloaded policy from {}", path.display()),
                Err(e) => tracing::warn!("hot-reload apply failed: {e}"),
            },
            Err(e) => tracing::warn!("hot-reload: policy file failed validation: {e}"),
        },
        Err(e) => tracing::warn!("hot-reload: failed to read {}: {e}", path.display()),
    }
}
