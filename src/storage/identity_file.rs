// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed identity persistence.
//!
//! The identity file is plain JSON holding the public keys, the enclave id
//! and the sealed blob. Secrets inside the blob are already protected by the
//! secure module, so this layer does no crypto of its own.
//!
//! A missing file and an unreadable or malformed one are different errors:
//! only [`StorageError::NotFound`] may lead to a new identity being created.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use super::IdentityPaths;
use crate::models::SealedIdentity;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No candidate location holds the identity file.
    #[error("identity file {file_name} not found (searched {searched:?})")]
    NotFound {
        file_name: String,
        searched: Vec<PathBuf>,
    },

    /// The file exists but its content is not a valid identity record.
    #[error("identity file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Refusing to overwrite an existing identity.
    #[error("identity file {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Reads and writes the sealed identity file.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    paths: IdentityPaths,
}

impl IdentityStore {
    pub fn new(paths: IdentityPaths) -> Self {
        Self { paths }
    }

    /// Load the identity from the first location on the search path.
    pub fn load(&self) -> StorageResult<(PathBuf, SealedIdentity)> {
        let path = self.paths.locate().ok_or_else(|| StorageError::NotFound {
            file_name: self.paths.file_name().to_string(),
            searched: self.paths.candidates(),
        })?;

        let mut data = Vec::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_end(&mut data))
            .map_err(|e| StorageError::io(&path, e))?;

        if data.is_empty() {
            return Err(StorageError::Corrupt {
                path,
                reason: "file is empty".to_string(),
            });
        }

        let record: SealedIdentity = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                return Err(StorageError::Corrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        if let Some(field) = record.missing_field() {
            return Err(StorageError::Corrupt {
                path,
                reason: format!("field {field} is empty"),
            });
        }

        Ok((path, record))
    }

    /// Persist a newly created identity (atomic write via rename).
    ///
    /// Never overwrites: an identity file that is already present is
    /// [`StorageError::AlreadyExists`].
    pub fn save(&self, record: &SealedIdentity) -> StorageResult<PathBuf> {
        let path = self.paths.save_target();
        if File::open(&path).is_ok() {
            return Err(StorageError::AlreadyExists(path));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| StorageError::io(&temp_path, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, record)
                .map_err(|e| StorageError::io(&temp_path, e.into()))?;
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| StorageError::io(&temp_path, e))?;
        }

        fs::rename(&temp_path, &path).map_err(|e| StorageError::io(&path, e))?;
        Ok(path)
    }
}
