use std::collections::HashSet;
use std::fmt;

use crate::ProcError;

const PID_LEN: usize = 5;
const PID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PID_GENERATION_RETRIES: usize = 10;

/// Identifier for a supervised process: five alphanumeric characters.
///
/// Distinct from an OS pid — it is assigned by the registry, not the
/// kernel, and is reused only once its backing process has been cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ProcessId {
    type Error = ProcError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != PID_LEN || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ProcError::Validation(format!(
                "invalid process id {value:?}: must be {PID_LEN} alphanumeric characters"
            )));
        }
        Ok(ProcessId(value.to_string()))
    }
}

impl TryFrom<String> for ProcessId {
    type Error = ProcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProcessId::try_from(value.as_str())
    }
}

/// Generates a fresh, unused `ProcessId` using rejection sampling.
///
/// Draws a random five-character alphanumeric string and retries up to
/// `PID_GENERATION_RETRIES` times if it collides with `existing`. Collisions
/// are expected to be vanishingly rare at the scale this service targets;
/// exhausting the retry budget indicates the registry is unexpectedly large
/// or the RNG is degenerate, either of which is worth surfacing as an error
/// rather than looping forever.
pub fn generate(existing: &HashSet<ProcessId>) -> Result<ProcessId, ProcError> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    for _ in 0..PID_GENERATION_RETRIES {
        let candidate: String = (0..PID_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..PID_ALPHABET.len());
                PID_ALPHABET[idx] as char
            })
            .collect();
        let candidate = ProcessId(candidate);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ProcError::Initialization {
        component: "pid generator".to_string(),
        reason: format!(
            "failed to generate a unique process id after {PID_GENERATION_RETRIES} attempts"
        ),
    })
}
