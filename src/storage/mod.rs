// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Storage
//!
//! Durable storage for the single sealed enclave identity.
//!
//! ## Layout
//!
//! ```text
//! <search dir 1>/<file name>     # searched first
//! <search dir N>/<file name>
//! <save dir>/<file name>         # written once, at creation
//! ```
//!
//! The file is read at every startup and written exactly once, when a new
//! identity is created. It is never deleted by the service, so an identity
//! whose registration failed can be registered on the next start.

pub mod identity_file;
pub mod paths;

pub use identity_file::{IdentityStore, StorageError, StorageResult};
pub use paths::IdentityPaths;
