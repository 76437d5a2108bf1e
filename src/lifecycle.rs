// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Enclave Lifecycle
//!
//! Resolves the process-wide [`EnclaveIdentity`] once, before any traffic is
//! served.
//!
//! ## Startup paths
//!
//! ```text
//! identity file found   -> load -> verify --(not registered)--> register -> verify
//! identity file missing -> create -> save -> register -> verify
//! identity file corrupt -> fatal (never create over it)
//! ```
//!
//! The new identity is saved before the registry hears about it. If
//! registration or verification fails the file stays on disk and the next
//! start registers that same identity instead of minting another.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::enclave::{EnclaveError, EnclaveIdentity, SecureModule};
use crate::ledger::{Registry, RegistryError};
use crate::models::{EnclaveInfo, SealedIdentity};
use crate::storage::{IdentityStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("identity storage: {0}")]
    Storage(#[from] StorageError),

    #[error("secure module: {0}")]
    Enclave(#[from] EnclaveError),

    #[error("registration failed: {0}")]
    Registration(#[source] RegistryError),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("enclave {0} is not registered")]
    NotRegistered(String),

    #[error("blocking task failed: {0}")]
    Worker(String),
}

/// Registry view of the local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Registered,
    Missing,
}

pub struct LifecycleManager<M, R> {
    module: Arc<M>,
    registry: R,
    store: IdentityStore,
}

impl<M, R> LifecycleManager<M, R>
where
    M: SecureModule + 'static,
    R: Registry,
{
    pub fn new(module: Arc<M>, registry: R, store: IdentityStore) -> Self {
        Self {
            module,
            registry,
            store,
        }
    }

    /// Load the persisted identity or create a new one, and make sure the
    /// registry knows it. Any error here means the service must not start.
    pub async fn resolve(&self) -> Result<EnclaveIdentity, LifecycleError> {
        let store = self.store.clone();
        match blocking(move || store.load()).await? {
            Ok((path, record)) => self.reopen(path, record).await,
            Err(e) if e.is_not_found() => {
                info!(error = %e, "No enclave identity found; creating a new one");
                self.create().await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reopen(&self, path: PathBuf, record: SealedIdentity) -> Result<EnclaveIdentity, LifecycleError> {
        info!(
            path = %path.display(),
            enclave_id = %record.info.enclave_id,
            "Loading enclave identity"
        );

        let module = self.module.clone();
        let identity = blocking(move || {
            module
                .load(&record)
                .map(|enclave| EnclaveIdentity::new(record, enclave))
        })
        .await??;

        if self.verify(identity.info()).await? == Registration::Missing {
            warn!(
                enclave_id = %identity.enclave_id(),
                "Persisted enclave identity is not registered; registering it now"
            );
            let identity = self.register(identity).await?;
            return self.confirm(identity).await;
        }

        Ok(identity)
    }

    async fn create(&self) -> Result<EnclaveIdentity, LifecycleError> {
        let module = self.module.clone();
        let (record, enclave) = blocking(move || module.create()).await??;
        info!(enclave_id = %record.info.enclave_id, "Created enclave identity");

        let store = self.store.clone();
        let saved = record.clone();
        let path = blocking(move || store.save(&saved)).await??;
        info!(path = %path.display(), "Saved enclave identity");

        let identity = self.register(EnclaveIdentity::new(record, enclave)).await?;
        self.confirm(identity).await
    }

    async fn register(&self, identity: EnclaveIdentity) -> Result<EnclaveIdentity, LifecycleError> {
        let (identity, proof) = blocking(move || {
            let proof = identity.registration_proof();
            (identity, proof)
        })
        .await?;

        self.registry
            .register(identity.info(), &proof?)
            .await
            .map_err(LifecycleError::Registration)?;
        Ok(identity)
    }

    /// Verify after a registration; the identity has to be present now.
    async fn confirm(&self, identity: EnclaveIdentity) -> Result<EnclaveIdentity, LifecycleError> {
        match self.verify(identity.info()).await? {
            Registration::Registered => Ok(identity),
            Registration::Missing => Err(LifecycleError::NotRegistered(
                identity.enclave_id().to_string(),
            )),
        }
    }

    async fn verify(&self, local: &EnclaveInfo) -> Result<Registration, LifecycleError> {
        let registered = self
            .registry
            .lookup(&local.enclave_id)
            .await
            .map_err(|e| LifecycleError::Verification(format!("lookup failed: {e}")))?;

        match registered {
            None => Ok(Registration::Missing),
            Some(remote) if remote == *local => {
                info!(enclave_id = %local.enclave_id, "Enclave registration verified");
                Ok(Registration::Registered)
            }
            Some(remote) => Err(LifecycleError::Verification(format!(
                "registry keys for {} do not match the local identity (registered verifying key: {})",
                local.enclave_id,
                remote.verifying_key.trim()
            ))),
        }
    }
}

async fn blocking<F, T>(f: F) -> Result<T, LifecycleError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LifecycleError::Worker(e.to_string()))
}
