use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Deep merge two TOML values. Overlay wins for non-table values; tables
/// are merged recursively so a project file can override a single nested
/// key without having to restate its siblings.
fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_map), toml::Value::Table(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged_val = match base_map.remove(&key) {
                    Some(base_val) => merge_toml_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged_val);
            }
            toml::Value::Table(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Per-command overrides as declared in a project's command-config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectCommandConfig {
    pub default_encoding: Option<String>,
    pub default_timeout: Option<u64>,
    #[serde(default)]
    pub default_envs: HashMap<String, Option<String>>,
}

/// Schema of the project-level command-config file (TOML), found by
/// walking upward from the working directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub extra_paths: Vec<String>,
    #[serde(default)]
    pub commands: HashMap<String, ProjectCommandConfig>,
}

/// Walks upward from `start_dir`, looking for `filename` at each level,
/// stopping once one of `roots` has been checked (inclusive) or the
/// filesystem root is reached. Returns the first match found, closest to
/// `start_dir` first.
pub fn locate(start_dir: &Path, filename: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if roots.iter().any(|root| root == &dir) {
            return None;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Loads and parses the project config at `path`. A missing file is not an
/// error at this layer — callers treat "no project config" as an empty
/// default, matching every other optional layer in the resolver.
pub fn load(path: &Path) -> Result<ProjectConfig, procsup_core::ProcError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| procsup_core::ProcError::Validation(format!("reading project config {path:?}: {e}")))?;
    let raw: toml::Value = toml::from_str(&text)
        .map_err(|e| procsup_core::ProcError::Validation(format!("parsing project config {path:?}: {e}")))?;
    // Merging against an empty base lets the project file selectively
    // override only the tables it declares, the same deep-merge semantics
    // used when layering this config over the global defaults.
    let merged = merge_toml_values(toml::Value::Table(Default::default()), raw);
    merged
        .try_into()
        .map_err(|e| procsup_core::ProcError::Validation(format!("project config {path:?} has invalid shape: {e}")))
}
