//! Executor Façade (C5): composes the resolver, supervisor, and output
//! store into the two operations external callers actually invoke —
//! `execute_command` (spawn, wait, return a bundled result) and
//! `start_background_command` (spawn, return immediately).

mod format;

use std::sync::Arc;
use std::time::{Duration, Instant};

use procsup_core::{ProcError, ProcessId, ProcessInfo, ProcessRecord, ProcessStatus, StreamKey};
use procsup_process::{CleanOutcome, Supervisor};
use procsup_resolver::{CallArgs, Resolver};
use procsup_store::{GetOptions, Store};
use tracing::instrument;

pub use format::{
    format_execute_result, format_execute_timeout, format_ps_clean, format_ps_detail,
    format_ps_list, format_ps_logs, format_ps_start, format_ps_stop, parse_status_filter,
    PsLogsOptions,
};

/// Bundled result of a synchronous `execute_command` call.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub pid: ProcessId,
    pub status: ProcessStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time: Duration,
}

pub struct Executor {
    resolver: Arc<Resolver>,
    supervisor: Arc<Supervisor>,
    store: Arc<Store>,
}

impl Executor {
    pub fn new(resolver: Arc<Resolver>, supervisor: Arc<Supervisor>, store: Arc<Store>) -> Self {
        Executor { resolver, supervisor, store }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Spawns `call`, waits for completion (bounded by the resolved
    /// timeout, if any), and returns the full (or `limit_lines`-tailed)
    /// stdout/stderr plus exit code.
    ///
    /// On deadline expiry the process is **not** killed by the façade — it
    /// is left to the supervisor's own deadline (set to the same value) to
    /// terminate it. The error
    /// carries the partial output collected so far and the pid remains
    /// registered for follow-up `command_ps_logs` queries.
    #[instrument(skip(self))]
    pub async fn execute_command(
        &self,
        call: CallArgs,
        limit_lines: Option<usize>,
    ) -> Result<ExecuteResult, ProcError> {
        let spec = self.resolver.resolve(call)?;
        let timeout_secs = spec.timeout_secs;
        let start = Instant::now();

        let record = self.supervisor.start_process(spec).await?;
        let pid = record.pid.clone();

        let completed = wait_for_completion(&record, timeout_secs).await;
        let execution_time = start.elapsed();

        if !completed {
            let stdout = self.tail_text(&pid, StreamKey::Stdout, limit_lines).await?;
            let stderr = self.tail_text(&pid, StreamKey::Stderr, limit_lines).await?;
            return Err(ProcError::CommandTimeout {
                message: format!(
                    "command timed out after {}s",
                    timeout_secs.unwrap_or_default()
                ),
                pid,
                stdout,
                stderr,
            });
        }

        let info = self.supervisor.get_process_info(&pid).await?;
        let stdout = self.tail_text(&pid, StreamKey::Stdout, limit_lines).await?;
        let stderr = self.tail_text(&pid, StreamKey::Stderr, limit_lines).await?;

        Ok(ExecuteResult {
            pid,
            status: info.status,
            exit_code: info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
            execution_time,
        })
    }

    /// Spawns `call` and returns its record immediately without awaiting
    /// completion.
    #[instrument(skip(self))]
    pub async fn start_background_command(
        &self,
        call: CallArgs,
    ) -> Result<Arc<ProcessRecord>, ProcError> {
        let spec = self.resolver.resolve(call)?;
        self.supervisor.start_process(spec).await
    }

    pub async fn get_process_info(&self, pid: &ProcessId) -> Result<ProcessInfo, ProcError> {
        self.supervisor.get_process_info(pid).await
    }

    pub async fn list_processes(
        &self,
        status: Option<ProcessStatus>,
        labels: &[String],
    ) -> Vec<ProcessInfo> {
        self.supervisor.list_processes(status, labels).await
    }

    pub async fn stop_process(&self, pid: &ProcessId, force: bool, reason: &str) -> Result<(), ProcError> {
        self.supervisor.stop_process(pid, force, reason).await
    }

    pub async fn clean_processes(
        &self,
        pids: &[ProcessId],
    ) -> std::collections::HashMap<ProcessId, CleanOutcome> {
        self.supervisor.clean_processes(pids).await
    }

    /// Retrieves formatted log output for `command_ps_logs`, applying the
    /// same time/grep/tail filtering the output store supports.
    pub async fn get_output(
        &self,
        pid: &ProcessId,
        stream: StreamKey,
        opts: GetOptions,
    ) -> Result<Vec<procsup_core::OutputEntry>, ProcError> {
        self.store
            .get(pid, stream, opts)
            .await
            .map_err(|e| e.into_proc_error(pid.clone()))
    }

    async fn tail_text(
        &self,
        pid: &ProcessId,
        stream: StreamKey,
        limit_lines: Option<usize>,
    ) -> Result<String, ProcError> {
        let opts = GetOptions { tail: limit_lines, ..Default::default() };
        let entries = self
            .store
            .get(pid, stream, opts)
            .await
            .map_err(|e| e.into_proc_error(pid.clone()))?;
        Ok(entries.into_iter().map(|e| e.text).collect::<Vec<_>>().join("\n"))
    }
}

/// Waits for `record`'s completion signal, bounded by `timeout_secs` if
/// set. Checks the current status first so a process that already
/// reached a terminal state before we start waiting (the common case for
/// very fast commands) is reported immediately rather than racing the
/// `Notify`.
async fn wait_for_completion(record: &ProcessRecord, timeout_secs: Option<u64>) -> bool {
    if record.state.lock().await.status.is_terminal() {
        return true;
    }
    let notified = record.completed.notified();
    match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), notified)
            .await
            .is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procsup_resolver::{ArgsInput, EnvConfig};
    use std::collections::HashSet;

    fn resolver(allowed: &[&str]) -> Arc<Resolver> {
        let mut env = EnvConfig::from_pairs(Vec::new());
        env.allowed_commands = allowed.iter().map(|s| s.to_string()).collect::<HashSet<_>>();
        Arc::new(Resolver::new(env, vec![]))
    }

    fn executor(allowed: &[&str]) -> (Executor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let sup = Supervisor::new(store.clone(), None, -1);
        (Executor::new(resolver(allowed), sup, store), dir)
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn execute_command_returns_bundled_output() {
        let (executor, _tmp) = executor(&["/bin/echo"]);
        let call = CallArgs::new(
            "/bin/echo",
            ArgsInput::Native(vec!["hello".to_string(), "world".to_string()]),
            std::env::temp_dir(),
        );
        let result = executor.execute_command(call, None).await.unwrap();
        assert_eq!(result.status, ProcessStatus::Completed);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello world");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn execute_command_surfaces_nonzero_exit() {
        let (executor, _tmp) = executor(&["/bin/sh"]);
        let call = CallArgs::new(
            "/bin/sh",
            ArgsInput::Native(vec!["-c".to_string(), "exit 42".to_string()]),
            std::env::temp_dir(),
        );
        let result = executor.execute_command(call, None).await.unwrap();
        assert_eq!(result.status, ProcessStatus::Failed);
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn execute_command_times_out_with_partial_output() {
        let (executor, _tmp) = executor(&["/bin/sh"]);
        let mut call = CallArgs::new(
            "/bin/sh",
            ArgsInput::Native(vec![
                "-c".to_string(),
                "echo partial; sleep 10".to_string(),
            ]),
            std::env::temp_dir(),
        );
        call.timeout_secs = Some(1);
        let err = executor.execute_command(call, None).await.unwrap_err();
        match err {
            ProcError::CommandTimeout { pid, stdout, .. } => {
                assert_eq!(stdout, "partial");
                // The process remains registered for follow-up log queries.
                executor.supervisor().get_process_info(&pid).await.unwrap();
                executor.stop_process(&pid, true, "test cleanup").await.unwrap();
            }
            other => panic!("expected CommandTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn start_background_command_returns_immediately() {
        let (executor, _tmp) = executor(&["/bin/sleep"]);
        let call = CallArgs::new(
            "/bin/sleep",
            ArgsInput::Native(vec!["30".to_string()]),
            std::env::temp_dir(),
        );
        let record = executor.start_background_command(call).await.unwrap();
        assert_eq!(record.state.lock().await.status, ProcessStatus::Running);
        executor.stop_process(&record.pid, true, "test cleanup").await.unwrap();
    }

    #[tokio::test]
    async fn disallowed_command_never_reaches_supervisor() {
        let (executor, _tmp) = executor(&["echo"]);
        let call = CallArgs::new("rm", ArgsInput::Native(vec![]), std::env::temp_dir());
        let err = executor.execute_command(call, None).await.unwrap_err();
        assert!(matches!(err, ProcError::Validation(_)));
    }
}
