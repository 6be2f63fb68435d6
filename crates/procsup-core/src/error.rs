use crate::ProcessId;

/// Error taxonomy for the process-supervision core.
///
/// One variant per error kind in the error-handling design: each maps to a
/// single propagation policy (surface to the immediate caller, drive an
/// internal state transition, or become an HTTP status in `procsup-api`).
#[derive(thiserror::Error, Debug)]
pub enum ProcError {
    #[error("failed to initialize {component}: {reason}")]
    Initialization { component: String, reason: String },

    #[error("failed to store output for process {pid}: {reason}")]
    Storage { pid: ProcessId, reason: String },

    #[error("failed to retrieve output for process {pid}: {reason}")]
    OutputRetrieval { pid: ProcessId, reason: String },

    #[error("failed to clear output for process {pid}: {reason}")]
    OutputClear { pid: ProcessId, reason: String },

    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),

    #[error("failed to execute command: {0}")]
    CommandExecution(String),

    #[error("command timed out: {message}")]
    CommandTimeout {
        message: String,
        pid: ProcessId,
        stdout: String,
        stderr: String,
    },

    #[error("process {pid} timed out after {timeout_secs}s")]
    ProcessTimeout { pid: ProcessId, timeout_secs: u64 },

    #[error("failed to control process {pid}: {reason}")]
    ProcessControl { pid: ProcessId, reason: String },

    #[error("failed to clean process {pid}: {reason}")]
    ProcessClean { pid: ProcessId, reason: String },

    #[error("web interface error: {0}")]
    Web(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl ProcError {
    /// Whether this error should map to HTTP 404 in `procsup-api`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcError::ProcessNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> ProcessId {
        ProcessId::try_from("ab12C").unwrap()
    }

    #[test]
    fn display_process_not_found() {
        let err = ProcError::ProcessNotFound(pid());
        assert_eq!(err.to_string(), "process ab12C not found");
    }

    #[test]
    fn display_command_timeout_carries_partial_output() {
        let err = ProcError::CommandTimeout {
            message: "sleep timed out".into(),
            pid: pid(),
            stdout: "partial\n".into(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "command timed out: sleep timed out");
        if let ProcError::CommandTimeout { stdout, pid: p, .. } = &err {
            assert_eq!(stdout, "partial\n");
            assert_eq!(p, &pid());
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn is_not_found_only_true_for_process_not_found() {
        assert!(ProcError::ProcessNotFound(pid()).is_not_found());
        assert!(!ProcError::Web("boom".into()).is_not_found());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProcError>();
    }
}
