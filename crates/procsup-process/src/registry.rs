//! In-memory pid → record mapping, the single source of truth for which
//! processes exist.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use procsup_core::{ProcError, ProcessId, ProcessInfo, ProcessRecord, ProcessStatus};

struct Entry {
    record: Arc<ProcessRecord>,
    os_pid: i32,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<ProcessId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn known_ids(&self) -> HashSet<ProcessId> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn insert(&self, record: Arc<ProcessRecord>, os_pid: i32) {
        let pid = record.pid.clone();
        self.entries.lock().unwrap().insert(pid, Entry { record, os_pid });
    }

    pub fn get(&self, pid: &ProcessId) -> Option<Arc<ProcessRecord>> {
        self.entries.lock().unwrap().get(pid).map(|e| e.record.clone())
    }

    pub fn os_pid(&self, pid: &ProcessId) -> Option<i32> {
        self.entries.lock().unwrap().get(pid).map(|e| e.os_pid)
    }

    pub fn remove(&self, pid: &ProcessId) -> Option<Arc<ProcessRecord>> {
        self.entries.lock().unwrap().remove(pid).map(|e| e.record)
    }

    pub fn contains(&self, pid: &ProcessId) -> bool {
        self.entries.lock().unwrap().contains_key(pid)
    }

    /// Snapshot of every registered process whose status and labels match
    /// the given filters. `status = None` matches any status; an empty
    /// `labels` filter matches any record.
    pub async fn list(&self, status: Option<ProcessStatus>, labels: &[String]) -> Vec<ProcessInfo> {
        let records: Vec<Arc<ProcessRecord>> = {
            let entries = self.entries.lock().unwrap();
            entries.values().map(|e| e.record.clone()).collect()
        };

        let mut out = Vec::new();
        for record in records {
            let state = record.state.lock().await.clone();
            if let Some(want) = status {
                if state.status != want {
                    continue;
                }
            }
            if !labels.iter().all(|l| record.labels.contains(l)) {
                continue;
            }
            out.push(to_info(&record, &state));
        }
        out
    }

    pub async fn info(&self, pid: &ProcessId) -> Result<ProcessInfo, ProcError> {
        let record = self.get(pid).ok_or_else(|| ProcError::ProcessNotFound(pid.clone()))?;
        let state = record.state.lock().await.clone();
        Ok(to_info(&record, &state))
    }

    /// All currently-running records, used for shutdown's force-stop pass.
    pub async fn running_ids(&self) -> Vec<ProcessId> {
        let records: Vec<Arc<ProcessRecord>> = {
            let entries = self.entries.lock().unwrap();
            entries.values().map(|e| e.record.clone()).collect()
        };
        let mut out = Vec::new();
        for record in records {
            if record.state.lock().await.status == ProcessStatus::Running {
                out.push(record.pid.clone());
            }
        }
        out
    }
}

fn to_info(record: &ProcessRecord, state: &procsup_core::ProcessState) -> ProcessInfo {
    ProcessInfo {
        pid: record.pid.clone(),
        command: record.command.clone(),
        args: record.args.clone(),
        directory: record.directory.clone(),
        description: record.description.clone(),
        labels: record.labels.clone(),
        status: state.status,
        start_time: record.start_time,
        end_time: state.end_time,
        exit_code: state.exit_code,
        error_message: state.error_message.clone(),
    }
}
