// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Dispatcher
//!
//! Accepts connections on the event loop and serves the routing table built
//! by [`crate::api::router`]. Enclave-backed handler bodies run on the
//! [`WorkerPool`]; their responses are written back here, on the loop.
//!
//! ## Shutdown sequence
//!
//! 1. The coordinator's drain token fires: the listener is closed and
//!    in-flight requests finish (bounded by the drain timeout, or cut short
//!    by a second signal).
//! 2. The worker pool refuses new units and joins its threads.
//! 3. The enclave identity is released, exactly once.
//! 4. The coordinator is marked stopped.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api;
use crate::config::{ConfigError, ServiceConfig};
use crate::enclave::EnclaveIdentity;
use crate::shutdown::{ShutdownCoordinator, ShutdownState};
use crate::state::AppState;
use crate::worker::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub struct Dispatcher {
    listener: TcpListener,
    router: Router,
    identity: Arc<EnclaveIdentity>,
    pool: Arc<WorkerPool>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Dispatcher {
    /// Bind the listener and build the routing table.
    pub async fn bind(
        config: &ServiceConfig,
        state: AppState,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Result<Self, ServerError> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let router = api::router(state.clone(), config.max_body_bytes);

        Ok(Self {
            listener,
            router,
            identity: state.identity,
            pool: state.pool,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Serve)
    }

    /// Serve until shutdown completes. The identity is released on every
    /// exit path.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            router,
            identity,
            pool,
            coordinator,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, workers = pool.worker_count(), "Enclave service listening");
        }

        let drain = coordinator.drain_token();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            drain.cancelled().await;
            info!("No longer accepting connections");
        });
        let server = server.into_future();

        let served = tokio::select! {
            result = server => result.map_err(ServerError::Serve),
            _ = coordinator.drain_deadline() => {
                warn!("Closing remaining connections without waiting");
                Ok(())
            }
        };

        // A serve error ends the loop without a signal.
        if coordinator.state() == ShutdownState::Running {
            coordinator.request_shutdown();
        }

        // The pool gets whatever is left of the drain budget.
        if !pool.shutdown(coordinator.drain_remaining()).await {
            warn!("Worker pool still busy; releasing enclave anyway");
        }

        identity.release();
        coordinator.mark_stopped();
        served
    }
}
