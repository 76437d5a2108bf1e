// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use eservice::client::ClientError;
use eservice::config::{Args, Config, ConfigError};
use eservice::enclave::{EnclaveError, SimulatedModule};
use eservice::ledger::{KeyError, LedgerClient, TransactionKeys};
use eservice::lifecycle::{LifecycleError, LifecycleManager};
use eservice::logging::{self, LogFormat};
use eservice::server::{Dispatcher, ServerError};
use eservice::shutdown::ShutdownCoordinator;
use eservice::state::AppState;
use eservice::storage::{IdentityPaths, IdentityStore};
use eservice::worker::{PoolError, WorkerPool};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("ledger key: {0}")]
    Key(#[from] KeyError),

    #[error("ledger client: {0}")]
    Client(#[from] ClientError),

    #[error("secure module: {0}")]
    Enclave(#[from] EnclaveError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

fn main() -> ExitCode {
    let result = match Config::from_args(Args::parse()) {
        Ok(config) => {
            logging::init(config.logging.format);
            start(config)
        }
        Err(e) => {
            logging::init(LogFormat::default());
            Err(e.into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Enclave service failed");
            ExitCode::FAILURE
        }
    }
}

fn start(config: Config) -> Result<(), StartupError> {
    let drain_timeout = config.service.drain_timeout;

    // Single-threaded event loop; blocking enclave and file calls go to the
    // worker pool or the runtime's capped blocking threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.service.reactor_threads)
        .thread_name("eservice-loop")
        .build()
        .map_err(StartupError::Runtime)?;

    let result = runtime.block_on(run(config));
    // Units abandoned at the drain deadline must not hold the process open.
    runtime.shutdown_timeout(drain_timeout);
    result
}

async fn run(config: Config) -> Result<(), StartupError> {
    info!(identity = %config.identity, "Starting enclave service");

    let keys = match &config.ledger.key_file {
        Some(file) => {
            let keys = TransactionKeys::read_from_file(file, &config.ledger.key_search_path)?;
            info!(file = %file, "Loaded ledger submitter key");
            Some(keys)
        }
        None => None,
    };
    let ledger = LedgerClient::new(&config.ledger, keys)?;
    info!(ledger = %ledger.url(), "Using ledger");

    let module = Arc::new(SimulatedModule::new(&config.enclave_module)?);
    let store = IdentityStore::new(IdentityPaths::from_config(&config.enclave_data));
    let identity = LifecycleManager::new(module, ledger, store).resolve().await?;

    let storage_service_url = config.storage_service.url.to_string();
    let info = identity.info();
    info!(
        enclave_id = %info.enclave_id,
        verifying_key = %info.verifying_key.trim(),
        encryption_key = %info.encryption_key.trim(),
        storage_service = %storage_service_url,
        "Enclave identity ready"
    );

    let identity = Arc::new(identity);
    let pool = Arc::new(WorkerPool::new(
        config.service.worker_threads,
        config.service.queue_depth,
    )?);
    let state = AppState::new(identity, pool, &storage_service_url);

    let coordinator = Arc::new(ShutdownCoordinator::new(config.service.drain_timeout));
    let dispatcher = Dispatcher::bind(&config.service, state, coordinator.clone()).await?;

    let signals = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!(error = %e, "Unable to install signal handlers; shutting down");
            signals.request_shutdown();
        }
    });

    dispatcher.run().await?;
    info!("Enclave service exited cleanly");
    Ok(())
}
