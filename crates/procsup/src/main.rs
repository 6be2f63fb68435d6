//! Binary entry point: wires the Resolver, Output Store, Supervisor,
//! Retention Scheduler, and Executor together and brings up the
//! Management HTTP API.
//!
//! Mode selection (stdio vs. HTTP transport) and the tool-call dispatcher
//! itself are out of scope for this crate — this binary only proves the
//! façade + HTTP surface are independently runnable before any dispatcher
//! logic runs on top of them.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use procsup_api::HttpEndpoint;
use procsup_core::RetentionHook;
use procsup_executor::Executor;
use procsup_process::Supervisor;
use procsup_resolver::{EnvConfig, Resolver};
use procsup_scheduler::Scheduler;
use procsup_store::Store;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .ok();

    let env_config = EnvConfig::from_env();

    let (storage_root, _temp_guard) = resolve_storage_root(&cli, &env_config)?;
    tracing::info!(path = %storage_root.display(), "output storage root");

    let store = Arc::new(Store::new(storage_root));
    let supervisor = Supervisor::new(store.clone(), None, env_config.process_retention_secs);

    let scheduler = Scheduler::new(supervisor.clone());
    supervisor.set_retention_hook(scheduler.clone() as Arc<dyn RetentionHook>);
    let sweep_handle = scheduler.spawn_loop();

    let project_roots = project_config_roots();
    let resolver = Arc::new(Resolver::new(env_config, project_roots));
    let executor = Arc::new(Executor::new(resolver, supervisor.clone(), store.clone()));

    let http = HttpEndpoint::start(&cli.bind, cli.port, executor.clone())
        .await
        .context("failed to start management HTTP API")?;
    tracing::info!(addr = %http.addr(), "management HTTP API listening");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested, draining");

    http.shutdown().await;
    sweep_handle.abort();
    supervisor
        .shutdown()
        .await
        .context("error during supervisor shutdown")?;

    Ok(())
}

/// Resolves the Output Store's root directory: an explicit `--storage-path`
/// flag wins, then `OUTPUT_STORAGE_PATH`, then a process-lifetime temp
/// directory that is removed on shutdown. The returned
/// `TempDir` guard must be kept alive for the temp-directory case; it is
/// `None` when a durable path was supplied.
fn resolve_storage_root(cli: &Cli, env: &EnvConfig) -> Result<(PathBuf, Option<tempfile::TempDir>)> {
    if let Some(path) = &cli.storage_path {
        return Ok((PathBuf::from(path), None));
    }
    if let Some(path) = &env.output_storage_path {
        return Ok((PathBuf::from(path), None));
    }
    let dir = tempfile::Builder::new()
        .prefix("procsup-")
        .tempdir()
        .context("failed to create temporary output storage directory")?;
    let path = dir.path().to_path_buf();
    Ok((path, Some(dir)))
}

/// Root paths bounding the Parameter Resolver's upward walk for project
/// config discovery: the user's home directory (if resolvable) and the
/// filesystem root, so a search always terminates.
fn project_config_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(base_dirs) = directories::BaseDirs::new() {
        roots.push(base_dirs.home_dir().to_path_buf());
    }
    roots.push(PathBuf::from("/"));
    roots
}
