use crate::ProcessId;

/// Hook the process supervisor uses to arm/disarm retention cleanup without
/// depending on the scheduler crate directly — `procsup-scheduler` is the
/// only implementation, injected into the supervisor at wiring time.
pub trait RetentionHook: Send + Sync {
    /// Schedules `pid` for automatic cleanup after `retention_secs` seconds
    /// have elapsed since it reached a terminal state. A negative value
    /// disables auto-cleanup for that pid.
    fn arm(&self, pid: ProcessId, retention_secs: i64);

    /// Cancels any pending cleanup for `pid`. Idempotent.
    fn disarm(&self, pid: &ProcessId);
}
