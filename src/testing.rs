// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test fixtures: a sample identity record, a scriptable enclave, a
//! counting secure module and an in-memory registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::enclave::{Enclave, EnclaveError, SecureModule};
use crate::ledger::{Registry, RegistryError};
use crate::models::{
    EnclaveInfo, InitializeRequest, InitializeResponse, InvokeRequest, InvokeResponse,
    SealedIdentity, VerifyRequest, VerifyResponse,
};

pub fn sample_record() -> SealedIdentity {
    SealedIdentity {
        info: EnclaveInfo {
            enclave_id: "5f2b9c0e4d7a8b1c".to_string(),
            verifying_key: "-----BEGIN PUBLIC KEY-----\nverifying\n-----END PUBLIC KEY-----\n".to_string(),
            encryption_key: "-----BEGIN PUBLIC KEY-----\nencryption\n-----END PUBLIC KEY-----\n"
                .to_string(),
        },
        sealed_data: "c2VhbGVk".to_string(),
    }
}

// =============================================================================
// StubEnclave
// =============================================================================

/// Enclave whose `invoke` can be slowed down and observed.
///
/// - `context_id == "missing"` is an unknown context.
/// - `method == "panic"` panics inside the call.
/// - a signature of `"sig"` verifies; `"!"` is undecodable.
#[derive(Default)]
pub struct StubEnclave {
    invoke_delay: Option<Duration>,
    entered: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    sequence: AtomicU64,
}

impl StubEnclave {
    pub fn slow(delay: Duration) -> Self {
        Self {
            invoke_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Number of `invoke` calls that have started.
    pub fn entered(&self) -> Arc<AtomicUsize> {
        self.entered.clone()
    }

    pub fn shutdowns(&self) -> Arc<AtomicUsize> {
        self.shutdowns.clone()
    }
}

impl Enclave for StubEnclave {
    fn registration_proof(&self) -> Result<String, EnclaveError> {
        Ok("stub-proof".to_string())
    }

    fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, EnclaveError> {
        if request.contract_id.is_empty() {
            return Err(EnclaveError::InvalidRequest("contract_id is required".to_string()));
        }
        Ok(InitializeResponse {
            context_id: "ctx-1".to_string(),
            contract_id: request.contract_id,
            enclave_id: sample_record().info.enclave_id,
            state_hash: "00".to_string(),
        })
    }

    fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, EnclaveError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.invoke_delay {
            std::thread::sleep(delay);
        }
        if request.method == "panic" {
            panic!("stub enclave asked to panic");
        }
        if request.context_id == "missing" {
            return Err(EnclaveError::UnknownContext(request.context_id));
        }
        Ok(InvokeResponse {
            context_id: request.context_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            state_hash: "00".to_string(),
            result: request.params,
            signature: "sig".to_string(),
        })
    }

    fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, EnclaveError> {
        if request.signature == "!" {
            return Err(EnclaveError::InvalidRequest("signature is not base64".to_string()));
        }
        Ok(VerifyResponse {
            valid: request.signature == "sig",
        })
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// CountingModule
// =============================================================================

/// Secure module that always mints [`sample_record`] and counts its calls.
#[derive(Clone, Default)]
pub struct CountingModule {
    pub creates: Arc<AtomicUsize>,
    pub loads: Arc<AtomicUsize>,
    pub fail_load: Arc<AtomicBool>,
}

impl SecureModule for CountingModule {
    fn create(&self) -> Result<(SealedIdentity, Box<dyn Enclave>), EnclaveError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok((sample_record(), Box::new(StubEnclave::default())))
    }

    fn load(&self, record: &SealedIdentity) -> Result<Box<dyn Enclave>, EnclaveError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(EnclaveError::Unseal(format!("cannot open {}", record.info.enclave_id)));
        }
        Ok(Box::new(StubEnclave::default()))
    }
}

// =============================================================================
// MockRegistry
// =============================================================================

/// In-memory registry. Clones share state.
#[derive(Clone, Default)]
pub struct MockRegistry {
    entries: Arc<Mutex<HashMap<String, EnclaveInfo>>>,
    pub registers: Arc<AtomicUsize>,
    pub lookups: Arc<AtomicUsize>,
    pub reject_registration: Arc<AtomicBool>,
}

impl MockRegistry {
    /// Record `info` directly, as if registered by an earlier run.
    pub fn insert(&self, info: EnclaveInfo) {
        self.entries.lock().unwrap().insert(info.enclave_id.clone(), info);
    }

    pub fn contains(&self, enclave_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(enclave_id)
    }
}

impl Registry for MockRegistry {
    async fn register(&self, info: &EnclaveInfo, proof: &str) -> Result<(), RegistryError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        if self.reject_registration.load(Ordering::SeqCst) {
            return Err(RegistryError::Rejected("registration refused".to_string()));
        }
        assert!(!proof.is_empty(), "registration submitted without proof");
        self.insert(info.clone());
        Ok(())
    }

    async fn lookup(&self, enclave_id: &str) -> Result<Option<EnclaveInfo>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().unwrap().get(enclave_id).cloned())
    }
}
