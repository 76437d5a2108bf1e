// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote enclave registry (ledger) integration.
//!
//! The lifecycle manager only sees the [`Registry`] trait: record an enclave
//! identity, and look one up by id. [`LedgerClient`] implements it over the
//! JSON-HTTP client.

#![allow(async_fn_in_trait)]

pub mod client;
pub mod keys;

pub use client::LedgerClient;
pub use keys::{KeyError, TransactionKeys};

use crate::client::ClientError;
use crate::models::EnclaveInfo;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The registry answered but refused or garbled the request.
    #[error("registry rejected request: {0}")]
    Rejected(String),
}

/// A trust registry enclave identities are recorded in.
pub trait Registry {
    /// Record `info` together with the module's registration proof.
    async fn register(&self, info: &EnclaveInfo, proof: &str) -> Result<(), RegistryError>;

    /// Fetch the registered record for `enclave_id`; `None` if unknown.
    async fn lookup(&self, enclave_id: &str) -> Result<Option<EnclaveInfo>, RegistryError>;
}
