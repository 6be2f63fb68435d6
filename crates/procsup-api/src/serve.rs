//! Owns the listening socket for the Management HTTP API.
//!
//! Binds a `TcpListener`, serves the router behind `axum::serve`, and wires
//! graceful shutdown through a `CancellationToken` rather than a signal
//! handler, so the caller controls exactly when the endpoint stops.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use procsup_executor::Executor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::router;

/// Request bodies larger than this are rejected before reaching a handler.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct HttpEndpoint {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server_task: JoinHandle<()>,
}

impl HttpEndpoint {
    pub async fn start(bind: &str, port: u16, executor: Arc<Executor>) -> Result<Self> {
        let bind_addr = format!("{bind}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid HTTP bind address '{bind}:{port}'"))?;

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind management HTTP endpoint at {bind_addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to resolve local management HTTP address")?;

        let shutdown = CancellationToken::new();
        let app = router(executor).layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES));

        let server_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    server_shutdown.cancelled().await;
                })
                .await
            {
                tracing::warn!(error = %error, "management HTTP server stopped with error");
            }
        });

        Ok(Self { addr: local_addr, shutdown, server_task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.server_task.await {
            tracing::debug!(error = %error, "management HTTP server join failed");
        }
    }
}
