//! Executable resolution and low-level child-process spawning.

use std::path::Path;

use anyhow::{Context, Result};
use procsup_core::{ProcError, SpawnSpec};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Windows built-in shell commands that have no standalone executable and
/// must be routed through `cmd.exe /c`.
#[cfg(windows)]
const WINDOWS_BUILTINS: &[&str] = &[
    "dir", "copy", "move", "del", "echo", "cd", "md", "rd", "type", "cls", "set", "ver",
];

/// Resolves `command` to a launchable program + argv pair, applying the
/// platform's shell-builtin and script-extension rules.
///
/// On Unix, a bare command is resolved against `PATH` via `which`; anything
/// already containing a path separator is used as-is. On Windows, names in
/// [`WINDOWS_BUILTINS`] and files ending in `.cmd`/`.bat`/`.com` are routed
/// through `cmd.exe /c` since they have no independently executable image.
pub fn resolve(command: &str, args: &[String]) -> Result<(String, Vec<String>), ProcError> {
    #[cfg(windows)]
    {
        let lower = command.to_ascii_lowercase();
        let is_builtin = WINDOWS_BUILTINS.contains(&lower.as_str());
        let is_script = lower.ends_with(".cmd") || lower.ends_with(".bat") || lower.ends_with(".com");
        if is_builtin || is_script {
            let mut shell_args = vec!["/c".to_string(), command.to_string()];
            shell_args.extend(args.iter().cloned());
            return Ok(("cmd.exe".to_string(), shell_args));
        }
        return Ok((command.to_string(), args.to_vec()));
    }

    #[cfg(not(windows))]
    {
        if command.contains('/') {
            return Ok((command.to_string(), args.to_vec()));
        }
        which::which(command).map_err(|e| {
            ProcError::CommandExecution(format!("executable {command:?} not found on PATH: {e}"))
        })?;
        Ok((command.to_string(), args.to_vec()))
    }
}

/// Encodes `text` into the named encoding. Errors only if `encoding` isn't
/// a label `encoding_rs` recognizes, or if `text` contains characters that
/// encoding can't represent.
fn encode_stdin(text: &str, encoding: &str) -> Result<Vec<u8>, ProcError> {
    let enc = encoding_rs::Encoding::for_label(encoding.as_bytes()).ok_or_else(|| {
        ProcError::CommandExecution(format!("unknown stdin encoding {encoding:?}"))
    })?;
    let (bytes, _, had_unmappable) = enc.encode(text);
    if had_unmappable {
        return Err(ProcError::CommandExecution(format!(
            "stdin contains characters not representable in {encoding:?}"
        )));
    }
    Ok(bytes.into_owned())
}

/// Validates that `directory` names an existing directory.
pub fn validate_directory(directory: &str) -> Result<(), ProcError> {
    let path = Path::new(directory);
    if path.is_dir() {
        Ok(())
    } else {
        Err(ProcError::CommandExecution(format!(
            "directory {directory:?} does not exist"
        )))
    }
}

/// Spawns `spec` with stdin/stdout/stderr piped, isolated in its own
/// process group so a forced stop can signal every descendant.
///
/// If `stdin_data` is given it is encoded per `spec.encoding` (any label
/// `encoding_rs` recognizes, e.g. `"utf-8"`, `"latin-1"`, `"ascii"`) and
/// written, then stdin is closed. An unrecognized encoding label or a
/// payload that can't be represented in the declared encoding is an
/// error; a broken pipe or connection reset during the write itself is
/// swallowed, since the child may have already exited. When no
/// `stdin_data` is given, stdin is closed immediately rather than
/// inherited, per the no-interactive-children invariant.
pub async fn spawn(spec: &SpawnSpec) -> Result<tokio::process::Child, ProcError> {
    validate_directory(&spec.directory)?;
    let (program, args) = resolve(&spec.command, &spec.args)?;

    let stdin_data = match spec.stdin_data.as_deref() {
        Some(text) => Some(encode_stdin(text, &spec.encoding)?),
        None => None,
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(&spec.directory);
    cmd.envs(&spec.envs);
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", spec.command))
        .map_err(|e| ProcError::CommandExecution(e.to_string()))?;

    let mut stdin = child.stdin.take();
    match stdin_data {
        Some(data) => {
            if let Some(mut handle) = stdin.take() {
                tokio::spawn(async move {
                    match handle.write_all(&data).await {
                        Ok(()) => {}
                        Err(e)
                            if e.kind() == std::io::ErrorKind::BrokenPipe
                                || e.kind() == std::io::ErrorKind::ConnectionReset => {}
                        Err(e) => warn!(error = %e, "error writing stdin to child"),
                    }
                    let _ = handle.shutdown().await;
                });
            }
        }
        None => {
            drop(stdin.take());
        }
    }

    Ok(child)
}

/// Sends `SIGKILL` to the child's entire process group (negative pid).
#[cfg(unix)]
pub fn kill_process_group(pid: i32) {
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(unix)]
pub fn terminate_process_group(pid: i32) {
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
}

