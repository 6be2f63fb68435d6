//! Process Supervisor and Registry: spawns children, pipes their I/O into
//! the Output Store, enforces deadlines, and tracks every process's
//! lifecycle state until it is cleaned up.

mod registry;
mod spawn;
mod supervisor;

pub use registry::Registry;
pub use spawn::{resolve, validate_directory};
pub use supervisor::{CleanOutcome, Supervisor};

#[cfg(test)]
mod lib_tests;
