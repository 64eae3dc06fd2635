//! Server implementation for the ingress guard
//!
//! This module owns the TCP listener and the per-connection tasks. Each
//! accepted connection is served as HTTP/1.1 with a header read timeout and a
//! bounded head buffer; every request on it is handed to the dispatcher
//! together with the peer address. The accept loop runs until the shutdown
//! token fires.

use crate::admission::AdmissionController;
use crate::config::GuardConfig;
use crate::dispatch::Dispatcher;
use crate::error::{GuardError, Result};
use crate::forward::ForwardingGateway;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, error, info};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// hyper's http1 connections reject head buffers below 8 KiB
const MIN_HEADER_BUFFER: usize = 8 * 1024;

/// Main guard server
pub struct GuardServer {
    /// Server configuration
    config: GuardConfig,

    /// Per-request entry point shared by all connection tasks
    dispatcher: Arc<Dispatcher>,
}

impl GuardServer {
    /// Create a server with fresh admission state from configuration
    pub fn new(config: GuardConfig) -> Self {
        let admission = Arc::new(AdmissionController::new(config.frequency));
        let gateway = ForwardingGateway::new(Duration::from_secs(config.write_timeout_secs));
        let dispatcher = Arc::new(Dispatcher::new(
            admission,
            gateway,
            config.backend.clone(),
        ));

        Self { config, dispatcher }
    }

    /// Get server configuration
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Shared admission state handle
    pub fn admission(&self) -> Arc<AdmissionController> {
        self.dispatcher.admission().clone()
    }

    /// Bind the configured listen address and serve until shutdown
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                GuardError::Server(format!("failed to bind {}: {}", self.config.listen_addr, e))
            })?;

        info!(
            "guard listening on {}, forwarding to {}",
            self.config.listen_addr, self.config.backend
        );
        self.serve(listener, shutdown).await
    }

    /// Accept loop over an already-bound listener
    async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs);
        let max_buf_size = self.config.max_header_bytes.max(MIN_HEADER_BUFFER);

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let remote = peer.to_string();
                let service = service_fn(move |req| {
                    let dispatcher = dispatcher.clone();
                    let remote = remote.clone();
                    async move { Ok::<_, Infallible>(dispatcher.handle(&remote, req).await) }
                });

                let connection = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(read_timeout)
                    .max_buf_size(max_buf_size)
                    .serve_connection(TokioIo::new(stream), service);

                if let Err(e) = connection.await {
                    debug!("connection from {} ended with error: {}", peer, e);
                }
            });
        }

        info!("guard server stopped");
        Ok(())
    }
}
