//! Management HTTP API (C6): a thin JSON surface over the process registry,
//! supervisor, and output store for callers that want process state without
//! going through the tool-call surface.

mod handlers;
mod serve;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use procsup_executor::Executor;

pub use handlers::{ApiState, ListQuery, OutputQuery, StopBody};
pub use serve::HttpEndpoint;

/// Builds the `/api/processes...` management router.
pub fn router(executor: Arc<Executor>) -> Router {
    Router::new()
        .route("/api/processes", get(handlers::list_processes))
        .route("/api/processes/{pid}", get(handlers::get_process))
        .route("/api/processes/{pid}/output", get(handlers::get_output))
        .route("/api/processes/{pid}/stop", post(handlers::stop_process))
        .route("/api/processes/{pid}/clean", post(handlers::clean_process))
        .with_state(ApiState { executor })
}
