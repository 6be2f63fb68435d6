//! Process Supervisor: spawns children, monitors their I/O and exit, and
//! drives each record through its lifecycle state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use procsup_core::{
    ProcError, ProcessId, ProcessRecord, ProcessStatus, RetentionHook, SpawnSpec,
};
use procsup_store::Store;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::registry::Registry;
use crate::spawn;

/// Grace window given to `stop_process` before giving up on confirmation.
const STOP_WAIT: Duration = Duration::from_secs(15);
/// Grace window given to the stdout/stderr readers to drain after the
/// child exits, before they're cancelled outright.
const DRAIN_WAIT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    store: Arc<Store>,
    registry: Arc<Registry>,
    /// Set once, after construction but before the first `start_process`,
    /// by whoever wires the supervisor together — the scheduler that
    /// implements `RetentionHook` is itself constructed from an
    /// `Arc<Supervisor>`, so the two can't be built in a single
    /// expression. A `OnceLock` lets the binary finish that wiring without
    /// the supervisor needing a `Mutex` it would otherwise never mutate.
    retention_hook: std::sync::OnceLock<Arc<dyn RetentionHook>>,
    /// Seconds a terminal process is kept before the retention hook auto-
    /// cleans it; negative disables auto-cleanup. Supplied by whoever wires
    /// the supervisor together, since it comes from process-wide config the
    /// supervisor itself has no other reason to know about.
    retention_secs: i64,
}

/// Outcome of a `clean_processes` request for a single pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    Success,
    NotFound,
    StillRunning,
}

impl std::fmt::Display for CleanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CleanOutcome::Success => "Success",
            CleanOutcome::NotFound => "Not found",
            CleanOutcome::StillRunning => "Failed: still running",
        };
        f.write_str(s)
    }
}

impl Supervisor {
    pub fn new(
        store: Arc<Store>,
        retention_hook: Option<Arc<dyn RetentionHook>>,
        retention_secs: i64,
    ) -> Arc<Self> {
        let hook_cell = std::sync::OnceLock::new();
        if let Some(hook) = retention_hook {
            let _ = hook_cell.set(hook);
        }
        Arc::new(Supervisor {
            store,
            registry: Arc::new(Registry::new()),
            retention_hook: hook_cell,
            retention_secs,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Wires in the retention hook after construction. Intended for the
    /// binary's composition root, where the scheduler (the hook
    /// implementation) is itself built from this supervisor's `Arc` and so
    /// cannot be passed into `Supervisor::new`. A no-op past the first call
    /// or once any process has already armed a timer through it.
    pub fn set_retention_hook(&self, hook: Arc<dyn RetentionHook>) {
        let _ = self.retention_hook.set(hook);
    }

    /// Spawns `spec`, registers it, and returns its record immediately.
    /// Monitoring (readers + waiter + deadline) runs in the background.
    ///
    /// The child is spawned before anything is written to the Output
    /// Store: a pid that never starts should leave no trace, and a pid
    /// is only handed to the Registry (the uniqueness oracle the next
    /// call to `generate_process_id` consults) once it actually exists.
    #[instrument(skip_all, fields(command = %spec.command))]
    pub async fn start_process(&self, spec: SpawnSpec) -> Result<Arc<ProcessRecord>, ProcError> {
        let existing = self.registry.known_ids();
        let pid = procsup_core::generate_process_id(&existing)?;

        let mut child = spawn::spawn(&spec).await?;
        let os_pid = child.id().ok_or_else(|| {
            ProcError::CommandExecution("spawned child has no os pid".to_string())
        })? as i32;

        self.store
            .register(&pid)
            .await
            .map_err(|e| e.into_proc_error(pid.clone()))?;

        let now = Utc::now();
        let record = ProcessRecord::new(pid.clone(), &spec, now);

        self.store
            .store(
                &pid,
                procsup_core::StreamKey::Manager,
                format!(
                    "process started: {} {} (pid {})",
                    spec.command,
                    spec.args.join(" "),
                    pid
                ),
            )
            .await
            .map_err(|e| e.into_proc_error(pid.clone()))?;

        self.registry.insert(record.clone(), os_pid);

        let stdout = child.stdout.take().expect("stdout piped at spawn");
        let stderr = child.stderr.take().expect("stderr piped at spawn");

        let store = self.store.clone();
        let registry = self.registry.clone();
        let retention_hook = self.retention_hook.get().cloned();
        let record_for_task = record.clone();
        let encoding = spec.encoding.clone();
        let timeout_secs = spec.timeout_secs;
        let retention_secs = self.retention_secs;

        tokio::spawn(async move {
            monitor(
                child,
                stdout,
                stderr,
                record_for_task,
                store,
                registry,
                retention_hook,
                encoding,
                timeout_secs,
                retention_secs,
            )
            .await;
        });

        Ok(record)
    }

    /// Requests termination of `pid`. A no-op if the process is not
    /// currently running. Sets `error_message` to `reason` before the
    /// signal is sent, then waits up to 15s for the monitor to confirm
    /// exit; a timed-out wait is logged, not raised, since the monitor
    /// will eventually finish on its own.
    #[instrument(skip(self))]
    pub async fn stop_process(&self, pid: &ProcessId, force: bool, reason: &str) -> Result<(), ProcError> {
        let record = self
            .registry
            .get(pid)
            .ok_or_else(|| ProcError::ProcessNotFound(pid.clone()))?;

        {
            let mut state = record.state.lock().await;
            if state.status != ProcessStatus::Running {
                return Ok(());
            }
            state.stopping = true;
            state.error_message = Some(reason.to_string());
        }

        if let Some(os_pid) = self.registry.os_pid(pid) {
            #[cfg(unix)]
            {
                if force {
                    spawn::kill_process_group(os_pid);
                } else {
                    spawn::terminate_process_group(os_pid);
                }
            }
            #[cfg(not(unix))]
            let _ = (os_pid, force);
        }

        match timeout(STOP_WAIT, record.completed.notified()).await {
            Ok(()) => {}
            Err(_) => {
                warn!(%pid, "stop_process: monitor did not confirm exit within grace window");
            }
        }

        Ok(())
    }

    pub async fn get_process_info(&self, pid: &ProcessId) -> Result<procsup_core::ProcessInfo, ProcError> {
        self.registry.info(pid).await
    }

    pub async fn list_processes(
        &self,
        status: Option<ProcessStatus>,
        labels: &[String],
    ) -> Vec<procsup_core::ProcessInfo> {
        self.registry.list(status, labels).await
    }

    /// Cleans each requested pid: clears its output, removes it from the
    /// registry, and cancels any armed retention timer. Still-running
    /// processes are reported, not cleaned; unknown pids likewise.
    pub async fn clean_processes(&self, pids: &[ProcessId]) -> HashMap<ProcessId, CleanOutcome> {
        let mut out = HashMap::new();
        for pid in pids {
            let Some(record) = self.registry.get(pid) else {
                out.insert(pid.clone(), CleanOutcome::NotFound);
                continue;
            };
            let status = record.state.lock().await.status;
            if !status.is_terminal() {
                out.insert(pid.clone(), CleanOutcome::StillRunning);
                continue;
            }
            if let Err(e) = self.store.clear(pid).await {
                warn!(%pid, error = %e, "failed to clear output during clean");
            }
            self.registry.remove(pid);
            if let Some(hook) = self.retention_hook.get() {
                hook.disarm(pid);
            }
            out.insert(pid.clone(), CleanOutcome::Success);
        }
        out
    }

    /// Disarms all retention timers, force-stops every running child with
    /// a "shutting down" reason, waits for their monitors to finish, then
    /// closes the Output Store.
    pub async fn shutdown(&self) -> Result<(), ProcError> {
        let running = self.registry.running_ids().await;
        for pid in &running {
            if let Some(hook) = self.retention_hook.get() {
                hook.disarm(pid);
            }
            if let Err(e) = self.stop_process(pid, true, "shutting down").await {
                warn!(%pid, error = %e, "error stopping process during shutdown");
            }
        }
        self.store
            .shutdown()
            .await
            .map_err(|e| e.into_proc_error(placeholder_pid()))
    }
}

fn placeholder_pid() -> ProcessId {
    ProcessId::try_from("00000").unwrap_or_else(|_| unreachable!())
}

#[allow(clippy::too_many_arguments)]
async fn monitor(
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    record: Arc<ProcessRecord>,
    store: Arc<Store>,
    registry: Arc<Registry>,
    retention_hook: Option<Arc<dyn RetentionHook>>,
    encoding: String,
    timeout_secs: Option<u64>,
    retention_secs: i64,
) {
    let pid = record.pid.clone();

    let stdout_task = tokio::spawn(read_stream(
        stdout,
        store.clone(),
        pid.clone(),
        procsup_core::StreamKey::Stdout,
        encoding.clone(),
    ));
    let stderr_task = tokio::spawn(read_stream(
        stderr,
        store.clone(),
        pid.clone(),
        procsup_core::StreamKey::Stderr,
        encoding,
    ));

    let deadline = timeout_secs.map(Duration::from_secs);
    let wait_result = match deadline {
        Some(d) => timeout(d, child.wait()).await,
        None => Ok(child.wait().await),
    };

    let mut timed_out = false;
    let exit_status = match wait_result {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!(%pid, error = %e, "error waiting for child exit");
            None
        }
        Err(_) => {
            timed_out = true;
            warn!(%pid, "process exceeded its deadline; killing process group");
            if let Some(os_pid) = registry.os_pid(&pid) {
                #[cfg(unix)]
                spawn::kill_process_group(os_pid);
            }
            child.wait().await.ok()
        }
    };

    // Drain-before-signal: join the readers (bounded) before anyone
    // observing `completed` can query the store, so they see full output.
    let _ = timeout(DRAIN_WAIT, stdout_task).await;
    let _ = timeout(DRAIN_WAIT, stderr_task).await;

    {
        let mut state = record.state.lock().await;
        state.end_time = Some(Utc::now());
        state.exit_code = exit_status.and_then(|s| s.code());

        if timed_out {
            state.stopping = true;
            state.status = ProcessStatus::Terminated;
            state.error_message = Some(format!(
                "process timed out after {}s",
                timeout_secs.unwrap_or_default()
            ));
        } else if state.stopping {
            state.status = ProcessStatus::Terminated;
        } else {
            match state.exit_code {
                Some(0) => state.status = ProcessStatus::Completed,
                Some(_) => state.status = ProcessStatus::Failed,
                None => state.status = ProcessStatus::Error,
            }
        }
        debug!(%pid, status = %state.status, exit_code = ?state.exit_code, "process reached terminal state");
    }

    let _ = store
        .store(
            &pid,
            procsup_core::StreamKey::Manager,
            format!("process ended with status {}", record_status(&record).await),
        )
        .await;

    if let Some(hook) = &retention_hook {
        hook.arm(pid.clone(), retention_secs);
    }

    record.completed.notify_waiters();
}

async fn record_status(record: &ProcessRecord) -> ProcessStatus {
    record.state.lock().await.status
}

/// Reads newline-delimited output from a child's stdout/stderr and
/// persists each line, decoded with the declared encoding. Invalid byte
/// sequences are replaced rather than rejected, so one malformed line
/// never costs the rest of the process's output; only a genuine I/O
/// error on the handle itself ends the reader early.
async fn read_stream<R>(
    handle: R,
    store: Arc<Store>,
    pid: ProcessId,
    stream: procsup_core::StreamKey,
    encoding: String,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let decoder = encoding_rs::Encoding::for_label(encoding.as_bytes()).unwrap_or(encoding_rs::UTF_8);
    let mut reader = BufReader::new(handle);
    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                if buf.is_empty() {
                    continue;
                }
                let (text, _, _) = decoder.decode(&buf);
                if let Err(e) = store.store(&pid, stream, text.into_owned()).await {
                    warn!(%pid, ?stream, error = %e, "failed to persist output line");
                }
            }
            Err(e) => {
                warn!(%pid, ?stream, error = %e, "error reading stream, stopping reader");
                let _ = store
                    .store(
                        &pid,
                        procsup_core::StreamKey::Manager,
                        format!("{stream} reader error: {e}"),
                    )
                    .await;
                break;
            }
        }
    }
}
