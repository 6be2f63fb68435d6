//! Parameter Resolver (C7): merges four configuration layers into a
//! concrete [`procsup_core::SpawnSpec`], and doubles as the allow-list gate
//! for which commands may be spawned at all.
//!
//! Layers, later wins:
//! 1. global defaults (`DEFAULT_ENCODING`, `DEFAULT_TIMEOUT`, a global env map)
//! 2. command-specific globals (`DEFAULT_ENCODING_<CMD>`, `<CMD>_COMMAND_ENV_<VAR>`)
//! 3. project config (an optional TOML file located by walking upward from
//!    the working directory)
//! 4. call-site arguments (`encoding`, `timeout`, `envs`)

mod env_config;
mod merge;
mod project;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use env_config::{CommandGlobals, EnvConfig, GlobalDefaults, normalize_command_key};
pub use project::{ProjectCommandConfig, ProjectConfig};

use procsup_core::{ProcError, SpawnSpec};

/// How the caller supplied the argv list: as a native sequence, or as a
/// JSON-encoded string of strings (the wire format §4.7 requires the
/// resolver to accept and parse, rejecting anything else).
#[derive(Debug, Clone)]
pub enum ArgsInput {
    Native(Vec<String>),
    Json(String),
}

impl ArgsInput {
    fn resolve(self) -> Result<Vec<String>, ProcError> {
        match self {
            ArgsInput::Native(v) => Ok(v),
            ArgsInput::Json(s) => {
                let value: serde_json::Value = serde_json::from_str(&s).map_err(|e| {
                    ProcError::Validation(format!("args is not valid JSON: {e}"))
                })?;
                let arr = value.as_array().ok_or_else(|| {
                    ProcError::Validation("args JSON must be an array of strings".to_string())
                })?;
                arr.iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            ProcError::Validation("args JSON array must contain only strings".to_string())
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Arguments the façade passes in at the call site — the fourth and
/// highest-priority merge layer.
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub command: String,
    pub args: ArgsInput,
    pub directory: PathBuf,
    pub encoding: Option<String>,
    pub timeout_secs: Option<u64>,
    /// `None` (key absent) leaves lower layers untouched; `Some(None)` is
    /// the wire "delete this key" sentinel; `Some(Some(v))` sets it.
    pub envs: HashMap<String, Option<String>>,
    pub labels: Vec<String>,
    pub description: Option<String>,
    pub stdin_data: Option<String>,
}

impl CallArgs {
    pub fn new(command: impl Into<String>, args: ArgsInput, directory: impl Into<PathBuf>) -> Self {
        CallArgs {
            command: command.into(),
            args,
            directory: directory.into(),
            encoding: None,
            timeout_secs: None,
            envs: HashMap::new(),
            labels: Vec::new(),
            description: None,
            stdin_data: None,
        }
    }
}

/// Deterministically merges the four configuration layers and gates
/// spawning on the `ALLOWED_COMMANDS` allow-list.
pub struct Resolver {
    env: EnvConfig,
    /// Root paths bounding the upward walk for project config discovery;
    /// typically the user's home directory and the filesystem root.
    project_roots: Vec<PathBuf>,
}

impl Resolver {
    pub fn new(env: EnvConfig, project_roots: Vec<PathBuf>) -> Self {
        Resolver { env, project_roots }
    }

    pub fn from_env(project_roots: Vec<PathBuf>) -> Self {
        Resolver::new(EnvConfig::from_env(), project_roots)
    }

    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    fn is_allowed(&self, command: &str) -> bool {
        self.env.allowed_commands.contains(command)
    }

    /// Locates and loads the project config applying to `directory`, if
    /// `PROJECT_COMMAND_CONFIG_FILE` names one and it's found by walking
    /// upward through `project_roots`. Absence at every level is not an
    /// error — it just means layer 3 contributes nothing.
    fn load_project_config(&self, directory: &Path) -> Result<Option<ProjectConfig>, ProcError> {
        let Some(filename) = &self.env.project_command_config_file else {
            return Ok(None);
        };
        match project::locate(directory, filename, &self.project_roots) {
            Some(path) => project::load(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Merges all four layers for `call` into a concrete [`SpawnSpec`].
    /// Fails with a validation error if `call.command` is not in
    /// `ALLOWED_COMMANDS`, or if `call.args` is a JSON string that doesn't
    /// parse as an array of strings.
    pub fn resolve(&self, call: CallArgs) -> Result<SpawnSpec, ProcError> {
        if !self.is_allowed(&call.command) {
            return Err(ProcError::Validation(format!(
                "command {:?} is not allowed",
                call.command
            )));
        }

        let args = call.args.resolve()?;
        let key = normalize_command_key(&call.command);
        let project = self.load_project_config(&call.directory)?;
        let project_cmd = project.as_ref().and_then(|p| p.commands.get(&call.command));

        let mut envs = self.env.global.envs.clone();
        if let Some(cmd_envs) = self.env.command_globals.default_envs.get(&key) {
            for (k, v) in cmd_envs {
                envs.insert(k.clone(), v.clone());
            }
        }
        if let Some(cmd_cfg) = project_cmd {
            merge::apply_env_overlay(&mut envs, &cmd_cfg.default_envs);
        }
        merge::apply_env_overlay(&mut envs, &call.envs);

        if let Some(project) = &project {
            if !project.extra_paths.is_empty() {
                let base_path = envs
                    .get("PATH")
                    .cloned()
                    .or_else(|| env_config::read_var("PATH"))
                    .unwrap_or_default();
                let mut prefix = project.extra_paths.clone();
                prefix.push(base_path);
                envs.insert("PATH".to_string(), prefix.join(":"));
            }
        }

        let mut encoding = self.env.global.encoding.clone();
        if let Some(e) = self.env.command_globals.default_encoding.get(&key) {
            encoding = e.clone();
        }
        if let Some(e) = project_cmd.and_then(|c| c.default_encoding.clone()) {
            encoding = e;
        }
        if let Some(e) = call.encoding {
            encoding = e;
        }

        let mut timeout_secs = self.env.global.timeout_secs;
        if let Some(t) = project_cmd.and_then(|c| c.default_timeout) {
            timeout_secs = Some(t);
        }
        if let Some(t) = call.timeout_secs {
            timeout_secs = Some(t);
        }

        Ok(SpawnSpec {
            command: call.command,
            args,
            directory: call.directory.to_string_lossy().to_string(),
            envs,
            encoding,
            timeout_secs,
            labels: call.labels,
            description: call.description,
            stdin_data: call.stdin_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(allowed: &[&str]) -> EnvConfig {
        let mut cfg = EnvConfig::from_pairs(Vec::new());
        cfg.allowed_commands = allowed.iter().map(|s| s.to_string()).collect();
        cfg
    }

    fn call(command: &str, args: Vec<&str>, dir: &Path) -> CallArgs {
        CallArgs::new(
            command,
            ArgsInput::Native(args.into_iter().map(String::from).collect()),
            dir,
        )
    }

    #[test]
    fn disallowed_command_is_rejected() {
        let resolver = Resolver::new(env(&["echo"]), vec![]);
        let dir = tempfile::tempdir().unwrap();
        let err = resolver.resolve(call("rm", vec!["-rf", "/"], dir.path())).unwrap_err();
        assert!(matches!(err, ProcError::Validation(_)));
    }

    #[test]
    fn allowed_command_resolves_with_global_defaults() {
        let mut e = env(&["echo"]);
        e.global.encoding = "utf-8".to_string();
        e.global.timeout_secs = Some(30);
        let resolver = Resolver::new(e, vec![]);
        let dir = tempfile::tempdir().unwrap();
        let spec = resolver.resolve(call("echo", vec!["hi"], dir.path())).unwrap();
        assert_eq!(spec.encoding, "utf-8");
        assert_eq!(spec.timeout_secs, Some(30));
        assert_eq!(spec.args, vec!["hi".to_string()]);
    }

    #[test]
    fn call_site_overrides_beat_global_defaults() {
        let mut e = env(&["echo"]);
        e.global.encoding = "utf-8".to_string();
        let resolver = Resolver::new(e, vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut c = call("echo", vec!["hi"], dir.path());
        c.encoding = Some("latin-1".to_string());
        let spec = resolver.resolve(c).unwrap();
        assert_eq!(spec.encoding, "latin-1");
    }

    #[test]
    fn json_args_are_parsed() {
        let resolver = Resolver::new(env(&["echo"]), vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut c = call("echo", vec![], dir.path());
        c.args = ArgsInput::Json(r#"["a","b"]"#.to_string());
        let spec = resolver.resolve(c).unwrap();
        assert_eq!(spec.args, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn non_array_json_args_are_rejected() {
        let resolver = Resolver::new(env(&["echo"]), vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut c = call("echo", vec![], dir.path());
        c.args = ArgsInput::Json(r#"{"a":1}"#.to_string());
        assert!(resolver.resolve(c).is_err());
    }

    #[test]
    fn call_site_null_env_deletes_lower_layer_value() {
        let mut e = env(&["echo"]);
        e.global.envs.insert("CI".to_string(), "true".to_string());
        let resolver = Resolver::new(e, vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut c = call("echo", vec![], dir.path());
        c.envs.insert("CI".to_string(), None);
        let spec = resolver.resolve(c).unwrap();
        assert!(!spec.envs.contains_key("CI"));
    }

    #[test]
    fn project_config_overrides_global_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("procsup.toml"),
            r#"
            [commands.echo]
            default_timeout = 99
            "#,
        )
        .unwrap();

        let mut e = env(&["echo"]);
        e.project_command_config_file = Some("procsup.toml".to_string());
        let resolver = Resolver::new(e, vec![dir.path().to_path_buf()]);

        let spec = resolver.resolve(call("echo", vec![], dir.path())).unwrap();
        assert_eq!(spec.timeout_secs, Some(99));
    }

    #[test]
    fn project_extra_paths_are_prepended_to_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("procsup.toml"),
            r#"extra_paths = ["/opt/tools/bin"]"#,
        )
        .unwrap();

        let mut e = env(&["echo"]);
        e.project_command_config_file = Some("procsup.toml".to_string());
        let resolver = Resolver::new(e, vec![dir.path().to_path_buf()]);

        let spec = resolver.resolve(call("echo", vec![], dir.path())).unwrap();
        assert!(spec.envs.get("PATH").unwrap().starts_with("/opt/tools/bin:"));
    }
}
