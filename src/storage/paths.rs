// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path resolution for the sealed identity file.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::EnclaveDataConfig;

/// Where the identity file is searched for and where it is saved.
#[derive(Debug, Clone)]
pub struct IdentityPaths {
    file_name: String,
    save_dir: PathBuf,
    search_path: Vec<PathBuf>,
}

impl IdentityPaths {
    pub fn new(
        file_name: impl Into<String>,
        save_dir: impl AsRef<Path>,
        search_path: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            save_dir: save_dir.as_ref().to_path_buf(),
            search_path: search_path.into_iter().collect(),
        }
    }

    pub fn from_config(config: &EnclaveDataConfig) -> Self {
        Self::new(
            config.file_name.clone(),
            &config.save_path,
            config.search_path.iter().cloned(),
        )
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Path the identity is written to on creation.
    pub fn save_target(&self) -> PathBuf {
        if Path::new(&self.file_name).is_absolute() {
            PathBuf::from(&self.file_name)
        } else {
            self.save_dir.join(&self.file_name)
        }
    }

    /// Candidate locations, in search order.
    ///
    /// The save directory is searched last so a freshly created identity is
    /// found on restart even if it is not on the configured search path.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if Path::new(&self.file_name).is_absolute() {
            return vec![PathBuf::from(&self.file_name)];
        }

        let mut candidates: Vec<PathBuf> = self
            .search_path
            .iter()
            .map(|dir| dir.join(&self.file_name))
            .collect();
        let saved = self.save_target();
        if !candidates.contains(&saved) {
            candidates.push(saved);
        }
        candidates
    }

    /// First candidate that can be opened.
    ///
    /// Uses `File::open()` rather than `Path::exists()` since a file that
    /// exists but cannot be opened is not usable either.
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates()
            .into_iter()
            .find(|path| File::open(path).is_ok())
    }
}
