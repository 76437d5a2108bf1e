// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secure Module Boundary
//!
//! The secure-execution primitive is consumed as a black box through two
//! traits:
//!
//! - [`SecureModule`] mints a new identity (`create`) or reopens a persisted
//!   one (`load`).
//! - [`Enclave`] is a live, opened identity: it produces registration proof,
//!   runs the three capability operations and releases its resources on
//!   `shutdown`.
//!
//! [`EnclaveIdentity`] wraps the single live enclave of the process together
//! with its public record. It is shared read-only (behind `Arc`) by every
//! endpoint and released exactly once at shutdown.
//!
//! All trait methods are blocking. Callers on the event loop must hand them
//! to the worker pool (or a blocking thread) instead of calling them inline.

pub mod simulator;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::{
    EnclaveInfo, InitializeRequest, InitializeResponse, InvokeRequest, InvokeResponse,
    SealedIdentity, VerifyRequest, VerifyResponse,
};

pub use simulator::SimulatedModule;

/// Errors raised by the secure module.
#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    /// Caller supplied input the module cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown execution context: {0}")]
    UnknownContext(String),

    /// Sealed state could not be opened or does not match its record.
    #[error("unable to unseal enclave state: {0}")]
    Unseal(String),

    #[error("enclave key operation failed: {0}")]
    Crypto(String),

    /// Root secret under the key root is missing or unusable.
    #[error("secure module key root: {0}")]
    KeyRoot(String),

    /// The identity was already released during shutdown.
    #[error("enclave has been released")]
    Released,
}

/// Factory side of the secure module.
pub trait SecureModule: Send + Sync {
    /// Mint a brand-new identity. Returns the record to persist and the
    /// opened enclave.
    fn create(&self) -> Result<(SealedIdentity, Box<dyn Enclave>), EnclaveError>;

    /// Reopen a persisted identity.
    fn load(&self, record: &SealedIdentity) -> Result<Box<dyn Enclave>, EnclaveError>;
}

/// An opened enclave identity.
pub trait Enclave: Send + Sync {
    /// Opaque evidence submitted with the registration request.
    fn registration_proof(&self) -> Result<String, EnclaveError>;

    fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, EnclaveError>;

    fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, EnclaveError>;

    fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, EnclaveError>;

    /// Release module resources. Called at most once, by [`EnclaveIdentity::release`].
    fn shutdown(&self);
}

/// The process-wide enclave identity.
pub struct EnclaveIdentity {
    record: SealedIdentity,
    enclave: Box<dyn Enclave>,
    released: AtomicBool,
}

impl EnclaveIdentity {
    pub fn new(record: SealedIdentity, enclave: Box<dyn Enclave>) -> Self {
        Self {
            record,
            enclave,
            released: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &EnclaveInfo {
        &self.record.info
    }

    pub fn enclave_id(&self) -> &str {
        &self.record.info.enclave_id
    }

    pub fn registration_proof(&self) -> Result<String, EnclaveError> {
        self.ensure_live()?;
        self.enclave.registration_proof()
    }

    pub fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, EnclaveError> {
        self.ensure_live()?;
        self.enclave.initialize(request)
    }

    pub fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, EnclaveError> {
        self.ensure_live()?;
        self.enclave.invoke(request)
    }

    pub fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, EnclaveError> {
        self.ensure_live()?;
        self.enclave.verify(request)
    }

    /// Release the enclave's resources.
    ///
    /// Only the first call reaches the module; later calls return `false`
    /// and do nothing.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!(enclave_id = %self.enclave_id(), "Enclave already released");
            return false;
        }
        tracing::info!(enclave_id = %self.enclave_id(), "Releasing enclave resources");
        self.enclave.shutdown();
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), EnclaveError> {
        if self.is_released() {
            Err(EnclaveError::Released)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for EnclaveIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnclaveIdentity")
            .field("enclave_id", &self.record.info.enclave_id)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, StubEnclave};

    #[test]
    fn release_reaches_module_once() {
        let enclave = StubEnclave::default();
        let shutdowns = enclave.shutdowns();
        let identity = EnclaveIdentity::new(sample_record(), Box::new(enclave));

        assert!(identity.release());
        assert!(!identity.release());
        assert!(identity.is_released());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_identity_refuses_work() {
        let identity = EnclaveIdentity::new(sample_record(), Box::new(StubEnclave::default()));
        identity.release();

        let err = identity
            .verify(VerifyRequest {
                context_id: "c".to_string(),
                sequence: 1,
                state_hash: "00".to_string(),
                signature: "AA==".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EnclaveError::Released));
    }

    #[test]
    fn debug_output_hides_sealed_data() {
        let identity = EnclaveIdentity::new(sample_record(), Box::new(StubEnclave::default()));
        let printed = format!("{identity:?}");
        assert!(printed.contains("enclave_id"));
        assert!(!printed.contains("sealed"));
    }
}
