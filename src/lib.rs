// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! eservice - Enclave Service front end
//!
//! Owns the process-wide enclave identity and serves it over HTTP.
//!
//! ## Modules
//!
//! - `lifecycle` - Load-or-create, persist, register and verify the identity
//! - `enclave` - Secure module boundary and the software module
//! - `storage` - Sealed identity file
//! - `ledger` - Enclave registry client and submitter keys
//! - `client` - JSON-over-HTTP client
//! - `api` - Capability endpoints (Axum)
//! - `worker` - Bounded worker pool for blocking enclave calls
//! - `server` - Request dispatcher
//! - `shutdown` - Signal-driven shutdown state machine

pub mod api;
pub mod client;
pub mod config;
pub mod enclave;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod testing;
