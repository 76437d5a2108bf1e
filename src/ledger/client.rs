// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger client speaking the enclave registry protocol.
//!
//! ## Requests
//!
//! ```text
//! {"op": "register_enclave", "enclave_id", "verifying_key", "encryption_key",
//!  "proof_data", "submitter"?, "signature"?}
//! {"op": "lookup_enclave", "enclave_id"}
//! ```
//!
//! A lookup answered with 404 means the enclave is not registered.

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

use super::{Registry, RegistryError, TransactionKeys};
use crate::client::{ClientError, JsonClient};
use crate::config::LedgerConfig;
use crate::models::EnclaveInfo;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LedgerRequest<'a> {
    RegisterEnclave {
        enclave_id: &'a str,
        verifying_key: &'a str,
        encryption_key: &'a str,
        proof_data: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        submitter: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    LookupEnclave {
        enclave_id: &'a str,
    },
}

/// [`Registry`] backed by the ledger's JSON endpoint.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: JsonClient,
    keys: Option<TransactionKeys>,
}

impl LedgerClient {
    pub fn new(config: &LedgerConfig, keys: Option<TransactionKeys>) -> Result<Self, ClientError> {
        let client = JsonClient::with_timeout(config.url.as_str(), config.request_timeout)?;
        if keys.is_none() {
            warn!(ledger = %client.url(), "No submitter key configured; registrations will be unsigned");
        }
        Ok(Self { client, keys })
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }
}

/// Bytes the submitter signature covers.
fn registration_digest(info: &EnclaveInfo, proof: &str) -> Vec<u8> {
    [
        info.enclave_id.as_str(),
        info.verifying_key.as_str(),
        info.encryption_key.as_str(),
        proof,
    ]
    .join("\n")
    .into_bytes()
}

impl Registry for LedgerClient {
    async fn register(&self, info: &EnclaveInfo, proof: &str) -> Result<(), RegistryError> {
        let request = LedgerRequest::RegisterEnclave {
            enclave_id: &info.enclave_id,
            verifying_key: &info.verifying_key,
            encryption_key: &info.encryption_key,
            proof_data: proof,
            submitter: self.keys.as_ref().map(TransactionKeys::public_pem),
            signature: self
                .keys
                .as_ref()
                .map(|keys| keys.sign(&registration_digest(info, proof))),
        };

        match self.client.post(&request).await? {
            Some(reply) => {
                info!(enclave_id = %info.enclave_id, ledger = %self.url(), reply = %reply, "Enclave registered");
                Ok(())
            }
            None => Err(RegistryError::Rejected(
                "ledger returned no result for registration".to_string(),
            )),
        }
    }

    async fn lookup(&self, enclave_id: &str) -> Result<Option<EnclaveInfo>, RegistryError> {
        let request = LedgerRequest::LookupEnclave { enclave_id };

        match self.client.post_as::<_, EnclaveInfo>(&request).await {
            Ok(Some(info)) => Ok(Some(info)),
            Ok(None) => Err(RegistryError::Rejected(
                "ledger returned no result for lookup".to_string(),
            )),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
