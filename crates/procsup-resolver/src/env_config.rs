//! Parses the service's environment inputs into the static pieces of the
//! four-layer merge: the allow-list gate, global defaults, and the
//! per-command global overrides carried in dynamically-named variables.

use std::collections::{HashMap, HashSet};
use std::env::VarError;

/// Global defaults layer: `DEFAULT_ENCODING`, `DEFAULT_TIMEOUT`, and a
/// global env mapping applied to every spawned command before any
/// per-command or per-call override.
///
/// `DEFAULT_ENCODING`/`DEFAULT_TIMEOUT` are read directly; the global env
/// mapping is read from `COMMAND_ENV_<VAR>` (the same `<VAR>` suffix
/// convention used by the per-command `<CMD>_COMMAND_ENV_<VAR>` family,
/// just without a command prefix), documented in DESIGN.md.
#[derive(Debug, Clone)]
pub struct GlobalDefaults {
    pub encoding: String,
    pub timeout_secs: Option<u64>,
    pub envs: HashMap<String, String>,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        GlobalDefaults {
            encoding: "utf-8".to_string(),
            timeout_secs: None,
            envs: HashMap::new(),
        }
    }
}

/// Command-specific globals layer: a per-command default encoding map and
/// a per-command env map, both read from dynamically-named variables at
/// startup (`DEFAULT_ENCODING_<CMD>`, `<CMD>_COMMAND_ENV_<VAR>`).
#[derive(Debug, Clone, Default)]
pub struct CommandGlobals {
    pub default_encoding: HashMap<String, String>,
    pub default_envs: HashMap<String, HashMap<String, String>>,
}

/// Everything this crate reads from the process environment once at
/// startup, separate from the per-call and per-project layers.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub allowed_commands: HashSet<String>,
    pub global: GlobalDefaults,
    pub command_globals: CommandGlobals,
    pub output_storage_path: Option<String>,
    pub process_retention_secs: i64,
    pub project_command_config_file: Option<String>,
}

const DEFAULT_RETENTION_SECS: i64 = 3600;

impl EnvConfig {
    /// Loads from the real process environment (`std::env::vars()`).
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Builds from an explicit iterator of `(key, value)` pairs; split out
    /// from [`Self::from_env`] so tests don't have to mutate process-wide
    /// environment state.
    pub fn from_pairs(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut allowed_commands = HashSet::new();
        let mut global = GlobalDefaults::default();
        let mut command_globals = CommandGlobals::default();
        let mut output_storage_path = None;
        let mut process_retention_secs = DEFAULT_RETENTION_SECS;
        let mut project_command_config_file = None;

        for (key, value) in vars {
            match key.as_str() {
                "ALLOWED_COMMANDS" => {
                    allowed_commands = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "DEFAULT_ENCODING" => global.encoding = value,
                "DEFAULT_TIMEOUT" => {
                    if let Ok(secs) = value.parse() {
                        global.timeout_secs = Some(secs);
                    }
                }
                "OUTPUT_STORAGE_PATH" => output_storage_path = Some(value),
                "PROCESS_RETENTION_SECONDS" => {
                    if let Ok(secs) = value.parse() {
                        process_retention_secs = secs;
                    }
                }
                "PROJECT_COMMAND_CONFIG_FILE" => project_command_config_file = Some(value),
                _ => {
                    if let Some(cmd) = key.strip_prefix("DEFAULT_ENCODING_") {
                        command_globals
                            .default_encoding
                            .insert(normalize_command_key(cmd), value);
                    } else if let Some(var) = key.strip_prefix("COMMAND_ENV_") {
                        global.envs.insert(var.to_string(), value);
                    } else if let Some((cmd, var)) = split_command_env_key(&key) {
                        command_globals
                            .default_envs
                            .entry(normalize_command_key(&cmd))
                            .or_default()
                            .insert(var, value);
                    }
                }
            }
        }

        EnvConfig {
            allowed_commands,
            global,
            command_globals,
            output_storage_path,
            process_retention_secs,
            project_command_config_file,
        }
    }
}

/// Splits a `<CMD>_COMMAND_ENV_<VAR>` key into its command and variable
/// parts. Returns `None` for anything that doesn't contain the
/// `_COMMAND_ENV_` marker (including the bare `COMMAND_ENV_<VAR>` global
/// form, handled separately).
fn split_command_env_key(key: &str) -> Option<(String, String)> {
    const MARKER: &str = "_COMMAND_ENV_";
    let idx = key.find(MARKER)?;
    let (cmd, rest) = key.split_at(idx);
    let var = &rest[MARKER.len()..];
    if cmd.is_empty() || var.is_empty() {
        return None;
    }
    Some((cmd.to_string(), var.to_string()))
}

/// Command names are matched case-insensitively against the uppercased,
/// punctuation-normalized form that an env-var key can carry (shells don't
/// allow `-`/`.` in identifiers), so `DEFAULT_ENCODING_NPM_RUN` matches a
/// command resolved as `npm-run` or `npm.run`.
pub fn normalize_command_key(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Reads a single `VAR` from the environment, treating "not present" and
/// "not valid unicode" the same way (as absence).
pub fn read_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) => Some(v),
        Err(VarError::NotPresent | VarError::NotUnicode(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_allowed_commands_as_comma_list() {
        let cfg = EnvConfig::from_pairs(pairs(&[("ALLOWED_COMMANDS", "echo, npm , cargo")]));
        assert_eq!(
            cfg.allowed_commands,
            HashSet::from(["echo".to_string(), "npm".to_string(), "cargo".to_string()])
        );
    }

    #[test]
    fn parses_global_defaults() {
        let cfg = EnvConfig::from_pairs(pairs(&[
            ("DEFAULT_ENCODING", "latin-1"),
            ("DEFAULT_TIMEOUT", "45"),
        ]));
        assert_eq!(cfg.global.encoding, "latin-1");
        assert_eq!(cfg.global.timeout_secs, Some(45));
    }

    #[test]
    fn parses_per_command_default_encoding() {
        let cfg = EnvConfig::from_pairs(pairs(&[("DEFAULT_ENCODING_NPM", "utf-16")]));
        assert_eq!(cfg.command_globals.default_encoding.get("NPM"), Some(&"utf-16".to_string()));
    }

    #[test]
    fn parses_per_command_env_vars() {
        let cfg = EnvConfig::from_pairs(pairs(&[("NPM_COMMAND_ENV_CI", "true")]));
        let envs = cfg.command_globals.default_envs.get("NPM").unwrap();
        assert_eq!(envs.get("CI"), Some(&"true".to_string()));
    }

    #[test]
    fn parses_global_env_vars_without_command_prefix() {
        let cfg = EnvConfig::from_pairs(pairs(&[("COMMAND_ENV_LANG", "C.UTF-8")]));
        assert_eq!(cfg.global.envs.get("LANG"), Some(&"C.UTF-8".to_string()));
    }

    #[test]
    fn retention_defaults_when_unset() {
        let cfg = EnvConfig::from_pairs(pairs(&[]));
        assert_eq!(cfg.process_retention_secs, DEFAULT_RETENTION_SECS);
    }

    #[test]
    fn negative_retention_is_preserved() {
        let cfg = EnvConfig::from_pairs(pairs(&[("PROCESS_RETENTION_SECONDS", "-1")]));
        assert_eq!(cfg.process_retention_secs, -1);
    }
}
