//! Single-flight test execution.
//!
//! The runner owns at most one live child process. Starting a new run cancels
//! the previous one immediately; the superseded run's terminal status is
//! suppressed so observers only ever see the current run complete. Output and
//! status travel on one ordered channel: for each run, every output line
//! precedes its single status message.

pub mod config;
pub mod job;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tokio::io::{AsyncRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use config::{Config, Override, load_config};
pub use job::{TestJob, prepare_job};

/// Buffered so slow consumers never stall the child's pipes in practice.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// A message from the runner: output lines, then exactly one status per run.
#[derive(Debug)]
pub enum RunnerUpdate {
    /// One line of combined stdout/stderr, trailing newline stripped.
    Output(String),
    /// Terminal result of the run: `Ok` on zero exit, `Err` otherwise.
    Status(anyhow::Result<()>),
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Manages execution of test commands, one at a time.
pub struct Runner {
    current: Arc<Mutex<Option<ActiveRun>>>,
    next_id: AtomicU64,
    updates_tx: mpsc::Sender<RunnerUpdate>,
}

impl Runner {
    /// Create a runner and the receiving end of its ordered update stream.
    pub fn new() -> (Self, mpsc::Receiver<RunnerUpdate>) {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        (
            Self {
                current: Arc::new(Mutex::new(None)),
                next_id: AtomicU64::new(0),
                updates_tx,
            },
            updates_rx,
        )
    }

    /// Execute `command` in `cwd`, killing any run still in flight.
    ///
    /// Returns as soon as the run task is spawned; output and status arrive
    /// on the update stream.
    pub fn run(&self, command: &str, args: &[String], cwd: &Path) {
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut current = lock(&self.current);
            if let Some(prev) = current.take() {
                prev.cancel.cancel();
            }
            *current = Some(ActiveRun {
                id,
                cancel: cancel.clone(),
            });
        }

        let task = RunTask {
            id,
            cancel,
            current: Arc::clone(&self.current),
            updates: self.updates_tx.clone(),
        };
        let command = command.to_owned();
        let args = args.to_vec();
        let cwd = cwd.to_path_buf();
        tokio::spawn(async move { task.execute(command, args, cwd).await });
    }

    /// Stop the current run, if any, without starting a new one. The killed
    /// run still reports its (failed) status.
    pub fn kill(&self) {
        if let Some(active) = lock(&self.current).as_ref() {
            active.cancel.cancel();
        }
    }
}

fn lock(current: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    current.lock().unwrap_or_else(|e| e.into_inner())
}

/// State for one spawned run, moved into its task.
struct RunTask {
    id: u64,
    cancel: CancellationToken,
    current: Arc<Mutex<Option<ActiveRun>>>,
    updates: mpsc::Sender<RunnerUpdate>,
}

impl RunTask {
    async fn execute(self, command: String, args: Vec<String>, cwd: PathBuf) {
        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .current_dir(&cwd)
            .env("FORCE_COLOR", "1")
            .env("CLICOLOR_FORCE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Lead a fresh process group so cancellation can take down the test
        // runner together with anything it spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.post(format!("Error: failed to start {command}: {err}"))
                    .await;
                self.finish(Err(err.into())).await;
                return;
            }
        };
        let pid = child.id();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, self.updates.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, self.updates.clone()));

        let cancelled = tokio::select! {
            _ = child.wait() => false,
            _ = self.cancel.cancelled() => true,
        };
        if cancelled {
            kill_process_group(&mut child, pid);
        }
        // Safe to call again: a finished child reports its cached status.
        let status = child.wait().await;

        // Process exit closes the pipes; wait for the readers to drain so
        // every output line precedes the status message.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let result = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(anyhow!("{status}")),
            Err(err) => Err(anyhow::Error::from(err)),
        };
        self.finish(result).await;
    }

    async fn post(&self, line: String) {
        let _ = self.updates.send(RunnerUpdate::Output(line)).await;
    }

    /// Report status only if this run is still the current one.
    async fn finish(self, result: anyhow::Result<()>) {
        let should_report = {
            let mut current = lock(&self.current);
            if current.as_ref().is_some_and(|active| active.id == self.id) {
                *current = None;
                true
            } else {
                false
            }
        };
        if should_report {
            let _ = self.updates.send(RunnerUpdate::Status(result)).await;
        }
    }
}

fn spawn_line_reader<R>(reader: R, updates: mpsc::Sender<RunnerUpdate>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if updates.send(RunnerUpdate::Output(line)).await.is_err() {
                return; // receiver dropped, shutdown
            }
        }
    })
}

/// Cancel the child. On Unix the whole process group is signalled; elsewhere
/// only the direct child can be killed.
#[cfg(unix)]
fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    match pid {
        Some(pid) => unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}
