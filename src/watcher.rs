use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::Context;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;

use crate::classify;
use crate::walker;

/// Quiet period after the last relevant event before a change is emitted.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Handle to a running watcher. Keeps the OS watcher alive (dropping stops
/// watching and lets the bridge task drain out).
pub struct WatcherHandle {
    _watcher: notify::RecommendedWatcher,
    _bridge_task: JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatcherHandle")
    }
}

/// Build a Gitignore matcher from the project root's .gitignore file.
/// If no .gitignore exists, returns an empty matcher that matches nothing.
fn build_gitignore_matcher(project_root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(project_root);
    let gitignore_path = project_root.join(".gitignore");
    if gitignore_path.exists() {
        let _ = builder.add(&gitignore_path);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Start a debounced file watcher on `root`.
///
/// Returns a `WatcherHandle` (must be kept alive) and a receiver yielding one
/// path per settled change. Raw events are filtered first — ignored paths,
/// directories, permission-only changes, and files that are neither source
/// nor config are dropped — then collapsed through a single 100 ms timer:
/// every accepted event restarts the timer and replaces the remembered path,
/// and when the timer fires the last-seen path is emitted.
pub fn start_watcher(
    root: &Path,
) -> anyhow::Result<(WatcherHandle, tokio_mpsc::Receiver<PathBuf>)> {
    let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();

    let mut fs_watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })
    .context("failed to create filesystem watcher")?;
    // Recursive mode picks up newly created subdirectories by itself.
    fs_watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;

    let gitignore = build_gitignore_matcher(root);
    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<PathBuf>(256);

    // Bridge: receive raw events on the std channel, filter, debounce, and
    // forward settled paths to the tokio channel.
    let bridge_task = tokio::task::spawn_blocking(move || {
        let mut pending: Option<PathBuf> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            let received = match deadline {
                None => match raw_rx.recv() {
                    Ok(res) => res,
                    Err(_) => return, // watcher dropped, shutdown
                },
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        deadline = None;
                        if let Some(path) = pending.take()
                            && tokio_tx.blocking_send(path).is_err()
                        {
                            return; // receiver dropped, shutdown
                        }
                        continue;
                    }
                    match raw_rx.recv_timeout(at - now) {
                        Ok(res) => res,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            // Flush the settled path before exiting.
                            if let Some(path) = pending.take() {
                                let _ = tokio_tx.blocking_send(path);
                            }
                            return;
                        }
                    }
                }
            };

            match received {
                Ok(event) => {
                    // Only accepted events restart the debounce timer.
                    for path in classify_event(&event, &gitignore) {
                        pending = Some(path);
                        deadline = Some(Instant::now() + DEBOUNCE);
                    }
                }
                Err(err) => {
                    eprintln!("[watcher] error: {err:?}");
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            _watcher: fs_watcher,
            _bridge_task: bridge_task,
        },
        tokio_rx,
    ))
}

/// Filter a raw notify event down to the paths the engine cares about.
///
/// Dropped: permission/metadata-only and access events; paths containing a
/// default-ignored component; .gitignore'd paths; directories (new ones are
/// watched automatically, never emitted); anything that is neither a source
/// file nor a config file.
fn classify_event(event: &Event, gitignore: &Gitignore) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        _ => {}
    }

    event
        .paths
        .iter()
        .filter(|path| {
            if path
                .components()
                .any(|c| walker::is_default_ignored(&c.as_os_str().to_string_lossy()))
            {
                return false;
            }
            let is_dir = path.is_dir();
            if gitignore.matched(path, is_dir).is_ignore() {
                return false;
            }
            if is_dir {
                return false;
            }
            classify::is_source_file(path) || classify::is_config_file(path)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::time::timeout;

    async fn recv_within(
        rx: &mut tokio_mpsc::Receiver<PathBuf>,
        dur: Duration,
    ) -> Option<PathBuf> {
        timeout(dur, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_emits_one_event_for_a_burst_of_writes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.ts");

        let (_handle, mut rx) = start_watcher(dir.path()).unwrap();
        // Give the OS watcher a moment to register.
        tokio::time::sleep(Duration::from_millis(150)).await;

        for i in 0..5 {
            fs::write(&file, format!("export const n = {i};")).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let event = recv_within(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(event.as_deref(), Some(file.as_path()));

        // The burst settled into a single emission.
        let extra = recv_within(&mut rx, Duration::from_millis(300)).await;
        assert!(extra.is_none(), "expected no second event, got {extra:?}");
    }

    #[tokio::test]
    async fn test_ignores_files_outside_the_allowlist() {
        let dir = tempfile::tempdir().unwrap();

        let (_handle, mut rx) = start_watcher(dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        fs::write(dir.path().join("notes.md"), "hello").unwrap();
        fs::write(dir.path().join("app.log"), "log line").unwrap();

        let event = recv_within(&mut rx, Duration::from_millis(400)).await;
        assert!(event.is_none(), "unexpected event: {event:?}");
    }

    #[tokio::test]
    async fn test_config_files_pass_the_filter() {
        let dir = tempfile::tempdir().unwrap();

        let (_handle, mut rx) = start_watcher(dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let config = dir.path().join("package.json");
        fs::write(&config, "{}").unwrap();

        let event = recv_within(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(event.as_deref(), Some(config.as_path()));
    }

    #[tokio::test]
    async fn test_gitignored_paths_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "generated/\n").unwrap();
        fs::create_dir(dir.path().join("generated")).unwrap();

        let (_handle, mut rx) = start_watcher(dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        fs::write(dir.path().join("generated/out.ts"), "x").unwrap();

        let event = recv_within(&mut rx, Duration::from_millis(400)).await;
        assert!(event.is_none(), "unexpected event: {event:?}");
    }
}
