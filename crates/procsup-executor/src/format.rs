//! Formats façade results into the literal tool-call wire contract. Every
//! function here is pure (no I/O), so each can be tested with exact-string
//! assertions against the literal text callers depend on.

use chrono::{DateTime, Utc};
use procsup_core::{OutputEntry, ProcessId, ProcessInfo, ProcessStatus};
use procsup_process::CleanOutcome;

use crate::ExecuteResult;

const DEFAULT_TIME_PREFIX_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%f";

/// `command_execute`'s 3-block result on normal completion: header,
/// fenced stdout, fenced stderr.
pub fn format_execute_result(result: &ExecuteResult) -> Vec<String> {
    vec![
        format!(
            "**process {} end with {} (exit code: {})**",
            result.pid, result.status, result.exit_code
        ),
        format!("```\n{}\n```", result.stdout),
        format!("```\n{}\n```", result.stderr),
    ]
}

/// `command_execute`'s 4-block result when the façade's wait exceeds the
/// resolved deadline: header naming the pid and "timed out", partial
/// stdout/stderr, and a notice that the process is still being tracked.
pub fn format_execute_timeout(
    pid: &ProcessId,
    timeout_secs: u64,
    stdout: &str,
    stderr: &str,
) -> Vec<String> {
    vec![
        format!("**process {pid} timed out after {timeout_secs}s**"),
        format!("```\n{stdout}\n```"),
        format!("```\n{stderr}\n```"),
        format!(
            "Process {pid} is still running; use command_ps_logs to retrieve further output."
        ),
    ]
}

/// `command_bg_start`'s single-block result.
pub fn format_ps_start(pid: &ProcessId) -> String {
    format!("Process started with PID: {pid}")
}

/// Parses a `status` filter string for `command_ps_list`, producing the
/// exact literal error text the wire contract specifies on failure.
pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<ProcessStatus>, String> {
    match raw {
        None => Ok(None),
        Some(s) => s.parse::<ProcessStatus>().map(Some).map_err(|_| {
            format!("Invalid status: {s}. Must be one of running, completed, failed, terminated, error")
        }),
    }
}

/// `command_ps_list`'s markdown table, or the literal `No processes
/// found.` when `infos` is empty.
pub fn format_ps_list(infos: &[ProcessInfo]) -> String {
    if infos.is_empty() {
        return "No processes found.".to_string();
    }
    let mut out = String::from("| PID | Status | Command | Description | Labels |\n|---|---|---|---|---|\n");
    for info in infos {
        let pid8: String = info.pid.as_str().chars().take(8).collect();
        let command = format!("{} {}", info.command, info.args.join(" "));
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            pid8,
            info.status,
            command.trim(),
            info.description.as_deref().unwrap_or(""),
            info.labels.join(", "),
        ));
    }
    out
}

/// `command_ps_stop`'s single-block result.
pub fn format_ps_stop(pid: &ProcessId) -> String {
    format!("Process {pid} stopped.")
}

/// `command_ps_clean`'s newline-delimited `pid: result` list, in the
/// order the caller supplied the pids.
pub fn format_ps_clean(results: &[(ProcessId, CleanOutcome)]) -> String {
    results
        .iter()
        .map(|(pid, outcome)| format!("{pid}: {outcome}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Options accepted by `command_ps_logs` that affect formatting rather
/// than which entries are retrieved (retrieval filtering is the output
/// store's `GetOptions`).
#[derive(Debug, Clone)]
pub struct PsLogsOptions {
    pub add_time_prefix: bool,
    pub time_prefix_format: Option<String>,
}

impl Default for PsLogsOptions {
    fn default() -> Self {
        PsLogsOptions { add_time_prefix: true, time_prefix_format: None }
    }
}

fn format_lines(entries: &[OutputEntry], opts: &PsLogsOptions) -> String {
    if !opts.add_time_prefix {
        return entries.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n");
    }
    let fmt = opts.time_prefix_format.as_deref().unwrap_or(DEFAULT_TIME_PREFIX_FORMAT);
    entries
        .iter()
        .map(|e| format!("[{}] {}", e.timestamp.format(fmt), e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `command_ps_logs`'s header block plus up to two fenced stdout/stderr
/// blocks (present only for the streams the caller asked for).
pub fn format_ps_logs(
    info: &ProcessInfo,
    stdout: Option<&[OutputEntry]>,
    stderr: Option<&[OutputEntry]>,
    opts: &PsLogsOptions,
) -> Vec<String> {
    let mut blocks = vec![format!(
        "**PID:** {}  \n**Command:** {}  \n**Description:** {}  \n**Status:** {}",
        info.pid,
        format!("{} {}", info.command, info.args.join(" ")).trim(),
        info.description.as_deref().unwrap_or(""),
        info.status,
    )];
    if let Some(entries) = stdout {
        blocks.push(format!("```\n{}\n```", format_lines(entries, opts)));
    }
    if let Some(entries) = stderr {
        blocks.push(format!("```\n{}\n```", format_lines(entries, opts)));
    }
    blocks
}

/// `command_ps_detail`'s markdown rendering of a process record's fields
/// plus elapsed duration. `now` is supplied by the caller
/// (rather than read internally) so the duration of a still-running
/// process is deterministic to test.
pub fn format_ps_detail(info: &ProcessInfo, now: DateTime<Utc>) -> String {
    let end = info.end_time.unwrap_or(now);
    let duration_secs = (end - info.start_time).num_milliseconds() as f64 / 1000.0;
    format!(
        "**PID:** {}\n**Command:** {}\n**Directory:** {}\n**Description:** {}\n**Labels:** {}\n\
         **Status:** {}\n**Start time:** {}\n**End time:** {}\n**Exit code:** {}\n\
         **Error message:** {}\n**Duration:** {:.3}s",
        info.pid,
        format!("{} {}", info.command, info.args.join(" ")).trim(),
        info.directory,
        info.description.as_deref().unwrap_or(""),
        info.labels.join(", "),
        info.status,
        info.start_time.to_rfc3339(),
        info.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        info.exit_code.map(|c| c.to_string()).unwrap_or_default(),
        info.error_message.as_deref().unwrap_or(""),
        duration_secs,
    )
}
