// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Enclave Service Data Models
//!
//! Wire types shared by the capability endpoints, the secure module and the
//! ledger client. Everything here derives `Serialize`/`Deserialize` and is
//! exchanged as JSON.
//!
//! ## Model Categories
//!
//! - **Identity**: public enclave metadata and the persisted sealed record
//! - **Info**: the `/info` response
//! - **Initialize / Invoke / Verify**: request and response bodies for the
//!   three enclave-backed endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Identity
// =============================================================================

/// Public half of the enclave identity.
///
/// Both keys are PEM-encoded `SubjectPublicKeyInfo` documents. The enclave id
/// is derived from the verifying key and never changes for the lifetime of
/// the identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnclaveInfo {
    pub enclave_id: String,
    pub verifying_key: String,
    pub encryption_key: String,
}

/// The identity record persisted to disk.
///
/// `sealed_data` is an opaque base64 blob only the secure module can open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedIdentity {
    #[serde(flatten)]
    pub info: EnclaveInfo,
    pub sealed_data: String,
}

impl SealedIdentity {
    /// Returns the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.info.enclave_id.trim().is_empty() {
            Some("enclave_id")
        } else if self.info.verifying_key.trim().is_empty() {
            Some("verifying_key")
        } else if self.info.encryption_key.trim().is_empty() {
            Some("encryption_key")
        } else if self.sealed_data.trim().is_empty() {
            Some("sealed_data")
        } else {
            None
        }
    }
}

// =============================================================================
// Info
// =============================================================================

/// Response body of `/info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoResponse {
    pub verifying_key: String,
    pub encryption_key: String,
    pub enclave_id: String,
    pub storage_service_url: String,
}

// =============================================================================
// Initialize
// =============================================================================

/// Request to prepare a fresh execution context inside the enclave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeRequest {
    pub contract_id: String,
    pub creator_id: String,
    /// Hash of the code the context will run, if the caller pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
}

/// A freshly created execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeResponse {
    pub context_id: String,
    pub contract_id: String,
    pub enclave_id: String,
    /// Hex SHA-256 of the initial context state.
    pub state_hash: String,
}

// =============================================================================
// Invoke
// =============================================================================

/// Request to run one unit of work inside an existing execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeRequest {
    pub context_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Result of an invocation, signed by the enclave's verifying key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeResponse {
    pub context_id: String,
    /// Position of this invocation within its context, starting at 1.
    pub sequence: u64,
    /// Hex SHA-256 of the context state after the invocation.
    pub state_hash: String,
    pub result: Value,
    /// Base64 DER ECDSA signature over [`invocation_message`].
    pub signature: String,
}

// =============================================================================
// Verify
// =============================================================================

/// Request to check a previously produced invocation signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRequest {
    pub context_id: String,
    pub sequence: u64,
    pub state_hash: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyResponse {
    pub valid: bool,
}

/// The exact bytes an invocation signature covers.
pub fn invocation_message(context_id: &str, sequence: u64, state_hash: &str) -> String {
    format!("{context_id}:{sequence}:{state_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SealedIdentity {
        SealedIdentity {
            info: EnclaveInfo {
                enclave_id: "abc".to_string(),
                verifying_key: "vk".to_string(),
                encryption_key: "ek".to_string(),
            },
            sealed_data: "blob".to_string(),
        }
    }

    #[test]
    fn sealed_identity_is_flat_json() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["enclave_id"], "abc");
        assert_eq!(json["verifying_key"], "vk");
        assert_eq!(json["sealed_data"], "blob");
        assert!(json.get("info").is_none());
    }

    #[test]
    fn missing_field_reports_first_empty_value() {
        assert_eq!(record().missing_field(), None);

        let mut r = record();
        r.sealed_data = "  ".to_string();
        assert_eq!(r.missing_field(), Some("sealed_data"));

        r.info.verifying_key.clear();
        assert_eq!(r.missing_field(), Some("verifying_key"));
    }

    #[test]
    fn invoke_request_params_default_to_null() {
        let req: InvokeRequest =
            serde_json::from_str(r#"{"context_id":"c","method":"m"}"#).unwrap();
        assert_eq!(req.params, Value::Null);
    }

    #[test]
    fn initialize_request_rejects_missing_creator() {
        let parsed = serde_json::from_str::<InitializeRequest>(r#"{"contract_id":"c"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn invocation_message_layout() {
        assert_eq!(invocation_message("ctx", 3, "ff00"), "ctx:3:ff00");
    }
}
