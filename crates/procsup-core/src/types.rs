use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::ProcessId;

/// Lifecycle state of a supervised process.
///
/// `Running` is the only non-terminal state. Once a process reaches any of
/// the other four, it stays there — the supervisor never transitions a
/// process back out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Terminated,
    Error,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Terminated => "terminated",
            ProcessStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = crate::ProcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ProcessStatus::Running),
            "completed" => Ok(ProcessStatus::Completed),
            "failed" => Ok(ProcessStatus::Failed),
            "terminated" => Ok(ProcessStatus::Terminated),
            "error" => Ok(ProcessStatus::Error),
            other => Err(crate::ProcError::Validation(format!(
                "Invalid status: {other}. Must be one of running, completed, failed, terminated, error"
            ))),
        }
    }
}

/// Identifies one of a process's output channels.
///
/// `Manager` carries supervisor-authored lines (start/stop/timeout
/// annotations) rather than anything written by the child itself, so it
/// gets its own table alongside stdout and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKey {
    Stdout,
    Stderr,
    Manager,
}

impl StreamKey {
    /// Table name for this stream within a process's output database.
    ///
    /// Stream names are a closed set of Rust identifiers, so no runtime
    /// sanitization is needed here; the name is still funneled through the
    /// same `logs_<name>` convention the output store uses for any other
    /// identifier it has to embed in SQL.
    pub fn sanitized_table_name(self) -> &'static str {
        match self {
            StreamKey::Stdout => "logs_stdout",
            StreamKey::Stderr => "logs_stderr",
            StreamKey::Manager => "logs_manager",
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamKey::Stdout => "stdout",
            StreamKey::Stderr => "stderr",
            StreamKey::Manager => "manager",
        };
        f.write_str(s)
    }
}

/// Fully-resolved description of a process to spawn.
///
/// Produced by the parameter resolver after merging all four configuration
/// layers; the process supervisor treats every field here as final.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub directory: String,
    pub envs: HashMap<String, String>,
    pub encoding: String,
    pub timeout_secs: Option<u64>,
    pub labels: Vec<String>,
    pub description: Option<String>,
    /// Payload to write to the child's stdin before closing it. Absent
    /// means stdin is closed immediately at launch.
    #[serde(default)]
    pub stdin_data: Option<String>,
}

/// A single captured line (or grep match) of process output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Mutable, shared bookkeeping for one supervised process.
///
/// `status`, `exit_code`, `end_time`, and `error_message` are guarded by
/// `state` because the monitoring task, the stop handler, and the retention
/// sweep can all observe or update them concurrently. `completed` is a
/// separate `Notify`: callers awaiting completion subscribe to it without
/// holding the mutex, and the monitoring task fires it only after stdout and
/// stderr have both been fully drained and folded into `state`, so nobody
/// observes a "completed" signal before its output is readable.
#[derive(Debug)]
pub struct ProcessRecord {
    pub pid: ProcessId,
    pub command: String,
    pub args: Vec<String>,
    pub directory: String,
    pub envs: HashMap<String, String>,
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub state: Mutex<ProcessState>,
    pub completed: Notify,
}

#[derive(Debug, Clone)]
pub struct ProcessState {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Set by `stop_process` before the termination signal is sent, so the
    /// monitor task knows an exit it observes afterward was requested
    /// rather than a natural completion or failure.
    pub stopping: bool,
}

impl ProcessState {
    pub fn running() -> Self {
        ProcessState {
            status: ProcessStatus::Running,
            exit_code: None,
            end_time: None,
            error_message: None,
            stopping: false,
        }
    }
}

impl ProcessRecord {
    pub fn new(pid: ProcessId, spec: &SpawnSpec, start_time: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ProcessRecord {
            pid,
            command: spec.command.clone(),
            args: spec.args.clone(),
            directory: spec.directory.clone(),
            envs: spec.envs.clone(),
            description: spec.description.clone(),
            labels: spec.labels.clone(),
            timeout_secs: spec.timeout_secs,
            start_time,
            state: Mutex::new(ProcessState::running()),
            completed: Notify::new(),
        })
    }
}

/// Point-in-time snapshot of a `ProcessRecord`, suitable for serialization
/// across the executor façade and the HTTP management API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub command: String,
    pub args: Vec<String>,
    pub directory: String,
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub status: ProcessStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}
