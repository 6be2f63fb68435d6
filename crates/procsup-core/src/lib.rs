//! Shared types and error taxonomy for the process-supervision workspace.
//!
//! Every other crate in this workspace depends on `procsup-core` for the
//! vocabulary it needs to talk about processes: identifiers, lifecycle
//! state, output streams, and the error enum that propagates failures from
//! the supervisor up through the executor façade and the HTTP API.

mod error;
mod ids;
mod retention;
mod types;

pub use error::ProcError;
pub use ids::generate as generate_process_id;
pub use retention::RetentionHook;
pub use types::{
    OutputEntry, ProcessInfo, ProcessRecord, ProcessState, ProcessStatus, SpawnSpec, StreamKey,
};

pub use ids::ProcessId;
