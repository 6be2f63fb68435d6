use std::collections::HashMap;

/// Applies an overlay of declared environment-variable changes onto an
/// accumulated map. A `None` value or an explicit empty string deletes the
/// key from the accumulated map rather than setting it — the layered
/// resolver's sentinel for "remove whatever an earlier layer set".
pub(crate) fn apply_env_overlay(
    accumulated: &mut HashMap<String, String>,
    overlay: &HashMap<String, Option<String>>,
) {
    for (key, value) in overlay {
        match value {
            Some(v) if !v.is_empty() => {
                accumulated.insert(key.clone(), v.clone());
            }
            _ => {
                accumulated.remove(key);
            }
        }
    }
}
