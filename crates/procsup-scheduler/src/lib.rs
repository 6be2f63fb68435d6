//! Retention Scheduler: auto-cleans terminal processes after a configured
//! delay, implemented as a single sweeping loop rather than one timer per
//! pid — simpler, and bounded in concurrency regardless of fleet size.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use procsup_core::{ProcessId, RetentionHook};
use procsup_process::Supervisor;
use tracing::{debug, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks which pids are armed for cleanup and sweeps them on an interval.
///
/// `arm`/`disarm` only edit the candidate set; the actual decision to clean
/// happens on the next sweep tick, which re-checks the registry so a pid
/// that was cleaned manually (or never reached a terminal state) is safely
/// skipped rather than double-cleaned.
pub struct Scheduler {
    supervisor: Arc<Supervisor>,
    candidates: Mutex<HashMap<ProcessId, i64>>,
}

impl Scheduler {
    pub fn new(supervisor: Arc<Supervisor>) -> Arc<Self> {
        Arc::new(Scheduler {
            supervisor,
            candidates: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the sweep loop as a background task. The returned handle is
    /// owned by the caller (typically the binary's shutdown sequence).
    pub fn spawn_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let snapshot: Vec<(ProcessId, i64)> = {
            let candidates = self.candidates.lock().unwrap();
            candidates.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        for (pid, retention_secs) in snapshot {
            if retention_secs < 0 {
                continue;
            }

            match self.supervisor.get_process_info(&pid).await {
                Ok(info) => {
                    if !info.status.is_terminal() {
                        continue;
                    }
                    let Some(end_time) = info.end_time else { continue };
                    if end_time + chrono::Duration::seconds(retention_secs) < Utc::now() {
                        debug!(%pid, retention_secs, "sweep: retention elapsed, cleaning");
                        let outcomes = self.supervisor.clean_processes(&[pid.clone()]).await;
                        if let Some(outcome) = outcomes.get(&pid) {
                            debug!(%pid, %outcome, "sweep: clean outcome");
                        }
                    }
                }
                Err(_) => {
                    // No longer registered (cleaned elsewhere); stop tracking it.
                    self.candidates.lock().unwrap().remove(&pid);
                }
            }
        }
    }
}

impl RetentionHook for Scheduler {
    fn arm(&self, pid: ProcessId, retention_secs: i64) {
        self.candidates.lock().unwrap().insert(pid, retention_secs);
    }

    fn disarm(&self, pid: &ProcessId) {
        if self.candidates.lock().unwrap().remove(pid).is_none() {
            // disarm is idempotent; nothing to warn about.
        }
    }
}
