// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::enclave::EnclaveIdentity;
use crate::models::InfoResponse;
use crate::worker::WorkerPool;

/// Context handed to every endpoint. Built once at startup.
#[derive(Clone, Debug)]
pub struct AppState {
    pub identity: Arc<EnclaveIdentity>,
    pub pool: Arc<WorkerPool>,
    pub storage_service_url: Arc<str>,
}

impl AppState {
    pub fn new(identity: Arc<EnclaveIdentity>, pool: Arc<WorkerPool>, storage_service_url: &str) -> Self {
        Self {
            identity,
            pool,
            storage_service_url: Arc::from(storage_service_url),
        }
    }

    /// Public identity metadata, as served by `/info`.
    pub fn info(&self) -> InfoResponse {
        let info = self.identity.info();
        InfoResponse {
            verifying_key: info.verifying_key.clone(),
            encryption_key: info.encryption_key.clone(),
            enclave_id: info.enclave_id.clone(),
            storage_service_url: self.storage_service_url.to_string(),
        }
    }
}
