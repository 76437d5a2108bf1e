// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Software secure module.
//!
//! Stands in for the hardware module when none is present. It keeps the same
//! contract as the real thing: secrets never leave the module unsealed, and
//! every operation is a blocking call.
//!
//! ## Keys
//!
//! - **Signing**: secp256k1 ECDSA. The verifying key is published and signs
//!   registration proof and invocation results.
//! - **Encryption**: a second secp256k1 key whose public half is published
//!   for callers that encrypt to the enclave.
//! - **Enclave id**: hex SHA-256 of the compressed verifying key.
//!
//! ## Sealing
//!
//! Both secrets are sealed with ChaCha20-Poly1305 under a key derived by
//! HMAC-SHA256 from the root secret in `{key_root}/sealing.key`. The file
//! must exist and hold at least 32 bytes; without it the module does not
//! start. The enclave id is bound as associated data, so a blob cannot be
//! replayed under another record.
//!
//! ## Execution contexts
//!
//! At most `max_contexts` contexts are kept. Creating one more evicts the
//! least recently used; invoking an evicted context is `UnknownContext`.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, Key, KeyInit, Nonce,
};
use hmac::{Hmac, Mac};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use k256::pkcs8::{EncodePublicKey, LineEnding};
use k256::SecretKey;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Enclave, EnclaveError, SecureModule};
use crate::config::EnclaveModuleConfig;
use crate::models::{
    invocation_message, EnclaveInfo, InitializeRequest, InitializeResponse, InvokeRequest,
    InvokeResponse, SealedIdentity, VerifyRequest, VerifyResponse,
};

/// ChaCha20-Poly1305 nonce length (12 bytes).
const NONCE_LEN: usize = 12;

/// Root secret file under the key root.
pub const SEALING_KEY_FILE: &str = "sealing.key";

/// Shortest accepted root secret, in bytes.
const MIN_ROOT_SECRET_LEN: usize = 32;

/// Domain label mixed into the sealing-key derivation.
const SEALING_LABEL: &[u8] = b"eservice/simulated-sealing-key/v1";

type HmacSha256 = Hmac<Sha256>;

/// Plaintext inside the sealed blob.
#[derive(Serialize, Deserialize)]
struct SealedSecrets {
    signing_key: String,
    encryption_key: String,
}

/// Software implementation of [`SecureModule`].
pub struct SimulatedModule {
    sealing_key: [u8; 32],
    slots: usize,
    max_contexts: NonZeroUsize,
}

impl SimulatedModule {
    /// Build a module from the root secret under the configured key root.
    pub fn new(config: &EnclaveModuleConfig) -> Result<Self, EnclaveError> {
        let root_secret = read_root_secret(&config.key_root)?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&root_secret)
            .map_err(|e| EnclaveError::Crypto(format!("sealing key derivation failed: {e}")))?;
        mac.update(SEALING_LABEL);

        let mut sealing_key = [0u8; 32];
        sealing_key.copy_from_slice(&mac.finalize().into_bytes());

        Ok(Self {
            sealing_key,
            slots: config.enclave_count.max(1),
            max_contexts: NonZeroUsize::new(config.max_contexts).unwrap_or(NonZeroUsize::MIN),
        })
    }

    fn seal(&self, enclave_id: &str, secrets: &SealedSecrets) -> Result<String, EnclaveError> {
        let plaintext = serde_json::to_vec(secrets)
            .map_err(|e| EnclaveError::Crypto(format!("serialize secrets failed: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.sealing_key));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: enclave_id.as_bytes(),
                },
            )
            .map_err(|e| EnclaveError::Crypto(format!("sealing failed: {e}")))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(Base64::encode_string(&blob))
    }

    fn unseal(&self, record: &SealedIdentity) -> Result<SealedSecrets, EnclaveError> {
        let blob = Base64::decode_vec(record.sealed_data.trim())
            .map_err(|e| EnclaveError::Unseal(format!("sealed data is not base64: {e}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(EnclaveError::Unseal("sealed data is truncated".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.sealing_key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: record.info.enclave_id.as_bytes(),
                },
            )
            .map_err(|_| {
                EnclaveError::Unseal("authentication failed (wrong key root or tampered data)".to_string())
            })?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| EnclaveError::Unseal(format!("sealed secrets are malformed: {e}")))
    }

    fn open(&self, info: EnclaveInfo, signing_key: SigningKey) -> SimulatedEnclave {
        SimulatedEnclave {
            info,
            signing_key,
            contexts: Mutex::new(LruCache::new(self.max_contexts)),
            slots: ContextSlots::new(self.slots),
            released: AtomicBool::new(false),
        }
    }
}

impl SecureModule for SimulatedModule {
    fn create(&self) -> Result<(SealedIdentity, Box<dyn Enclave>), EnclaveError> {
        let signing_key = SigningKey::random(&mut OsRng);
        let encryption_key = SecretKey::random(&mut OsRng);

        let info = describe(&signing_key, &encryption_key)?;
        let secrets = SealedSecrets {
            signing_key: Base64::encode_string(&signing_key.to_bytes()),
            encryption_key: Base64::encode_string(&encryption_key.to_bytes()),
        };
        let sealed_data = self.seal(&info.enclave_id, &secrets)?;

        let record = SealedIdentity {
            info: info.clone(),
            sealed_data,
        };
        Ok((record, Box::new(self.open(info, signing_key))))
    }

    fn load(&self, record: &SealedIdentity) -> Result<Box<dyn Enclave>, EnclaveError> {
        let secrets = self.unseal(record)?;

        let signing_bytes = Base64::decode_vec(&secrets.signing_key)
            .map_err(|e| EnclaveError::Unseal(format!("signing key encoding: {e}")))?;
        let signing_key = SigningKey::from_slice(&signing_bytes)
            .map_err(|e| EnclaveError::Unseal(format!("signing key: {e}")))?;

        let encryption_bytes = Base64::decode_vec(&secrets.encryption_key)
            .map_err(|e| EnclaveError::Unseal(format!("encryption key encoding: {e}")))?;
        let encryption_key = SecretKey::from_slice(&encryption_bytes)
            .map_err(|e| EnclaveError::Unseal(format!("encryption key: {e}")))?;

        let info = describe(&signing_key, &encryption_key)?;
        if info != record.info {
            return Err(EnclaveError::Unseal(
                "sealed keys do not match the identity record".to_string(),
            ));
        }

        Ok(Box::new(self.open(info, signing_key)))
    }
}

fn read_root_secret(key_root: &Path) -> Result<Vec<u8>, EnclaveError> {
    let path = key_root.join(SEALING_KEY_FILE);
    let secret = std::fs::read(&path)
        .map_err(|e| EnclaveError::KeyRoot(format!("{}: {e}", path.display())))?;
    if secret.len() < MIN_ROOT_SECRET_LEN {
        return Err(EnclaveError::KeyRoot(format!(
            "{}: root secret must be at least {MIN_ROOT_SECRET_LEN} bytes",
            path.display()
        )));
    }
    Ok(secret)
}

/// Derive the public record for a key pair.
fn describe(signing_key: &SigningKey, encryption_key: &SecretKey) -> Result<EnclaveInfo, EnclaveError> {
    let verifying_key = signing_key.verifying_key();
    let verifying_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EnclaveError::Crypto(format!("encode verifying key: {e}")))?;
    let encryption_pem = encryption_key
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EnclaveError::Crypto(format!("encode encryption key: {e}")))?;

    let compressed = verifying_key.to_encoded_point(true);
    Ok(EnclaveInfo {
        enclave_id: sha256_hex(&[compressed.as_bytes()]),
        verifying_key: verifying_pem,
        encryption_key: encryption_pem,
    })
}

/// The message signed as registration proof.
pub fn registration_message(info: &EnclaveInfo) -> String {
    format!(
        "register:{}:{}:{}",
        info.enclave_id,
        sha256_hex(&[info.verifying_key.as_bytes()]),
        sha256_hex(&[info.encryption_key.as_bytes()])
    )
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Opened enclave
// =============================================================================

#[derive(Debug, Clone)]
struct ExecutionContext {
    state_hash: String,
    sequence: u64,
}

struct SimulatedEnclave {
    info: EnclaveInfo,
    signing_key: SigningKey,
    contexts: Mutex<LruCache<String, ExecutionContext>>,
    slots: ContextSlots,
    released: AtomicBool,
}

impl SimulatedEnclave {
    fn contexts(&self) -> MutexGuard<'_, LruCache<String, ExecutionContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sign(&self, message: &str) -> String {
        let signature: Signature = self.signing_key.sign(message.as_bytes());
        Base64::encode_string(signature.to_der().as_bytes())
    }

    fn ensure_live(&self) -> Result<(), EnclaveError> {
        if self.released.load(Ordering::Acquire) {
            Err(EnclaveError::Released)
        } else {
            Ok(())
        }
    }
}

impl Enclave for SimulatedEnclave {
    fn registration_proof(&self) -> Result<String, EnclaveError> {
        self.ensure_live()?;
        let _slot = self.slots.acquire();
        Ok(self.sign(&registration_message(&self.info)))
    }

    fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, EnclaveError> {
        self.ensure_live()?;
        if request.contract_id.trim().is_empty() {
            return Err(EnclaveError::InvalidRequest("contract_id is required".to_string()));
        }
        if request.creator_id.trim().is_empty() {
            return Err(EnclaveError::InvalidRequest("creator_id is required".to_string()));
        }

        let _slot = self.slots.acquire();
        let code_hash = request.code_hash.as_deref().unwrap_or_default();
        let state_hash = sha256_hex(&[
            request.contract_id.as_bytes(),
            b"\0",
            request.creator_id.as_bytes(),
            b"\0",
            code_hash.as_bytes(),
        ]);
        let context_id = uuid::Uuid::new_v4().to_string();

        let evicted = self.contexts().push(
            context_id.clone(),
            ExecutionContext {
                state_hash: state_hash.clone(),
                sequence: 0,
            },
        );
        if let Some((evicted_id, _)) = evicted {
            tracing::debug!(context_id = %evicted_id, "Execution context evicted");
        }

        tracing::debug!(context_id = %context_id, contract_id = %request.contract_id, "Execution context created");

        Ok(InitializeResponse {
            context_id,
            contract_id: request.contract_id,
            enclave_id: self.info.enclave_id.clone(),
            state_hash,
        })
    }

    fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, EnclaveError> {
        self.ensure_live()?;
        if request.method.trim().is_empty() {
            return Err(EnclaveError::InvalidRequest("method is required".to_string()));
        }
        let params = serde_json::to_string(&request.params)
            .map_err(|e| EnclaveError::InvalidRequest(format!("params: {e}")))?;

        let _slot = self.slots.acquire();

        // Invocations on one context are applied in order.
        let (sequence, state_hash) = {
            let mut contexts = self.contexts();
            let context = contexts
                .get_mut(&request.context_id)
                .ok_or_else(|| EnclaveError::UnknownContext(request.context_id.clone()))?;

            context.sequence += 1;
            context.state_hash = sha256_hex(&[
                context.state_hash.as_bytes(),
                request.method.as_bytes(),
                params.as_bytes(),
            ]);
            (context.sequence, context.state_hash.clone())
        };

        let signature = self.sign(&invocation_message(&request.context_id, sequence, &state_hash));

        Ok(InvokeResponse {
            context_id: request.context_id,
            sequence,
            state_hash,
            result: request.params,
            signature,
        })
    }

    fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, EnclaveError> {
        self.ensure_live()?;
        let der = Base64::decode_vec(request.signature.trim())
            .map_err(|_| EnclaveError::InvalidRequest("signature is not base64".to_string()))?;
        let signature = Signature::from_der(&der)
            .map_err(|_| EnclaveError::InvalidRequest("signature is not DER encoded".to_string()))?;

        let _slot = self.slots.acquire();
        let message = invocation_message(&request.context_id, request.sequence, &request.state_hash);
        let verifying_key: &VerifyingKey = self.signing_key.verifying_key();
        let valid = verifying_key.verify(message.as_bytes(), &signature).is_ok();

        Ok(VerifyResponse { valid })
    }

    fn shutdown(&self) {
        self.released.store(true, Ordering::Release);
        let dropped = {
            let mut contexts = self.contexts();
            let n = contexts.len();
            contexts.clear();
            n
        };
        tracing::info!(
            enclave_id = %self.info.enclave_id,
            contexts = dropped,
            "Simulated enclave shut down"
        );
    }
}

// =============================================================================
// Secure-context slots
// =============================================================================

/// Counting gate over the module's secure contexts.
///
/// Blocks the calling worker thread while every context is busy.
struct ContextSlots {
    free: Mutex<usize>,
    available: Condvar,
}

struct SlotGuard<'a> {
    slots: &'a ContextSlots,
}

impl ContextSlots {
    fn new(count: usize) -> Self {
        Self {
            free: Mutex::new(count),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) -> SlotGuard<'_> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        while *free == 0 {
            free = self
                .available
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *free -= 1;
        SlotGuard { slots: self }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut free = self.slots.free.lock().unwrap_or_else(PoisonError::into_inner);
        *free += 1;
        self.slots.available.notify_one();
    }
}
