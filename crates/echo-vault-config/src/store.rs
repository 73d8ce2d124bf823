// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage port for the single config document, and a filesystem-backed
//! implementation of it.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures loading or saving the config document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file was present at the configured path.
    #[error("not found")]
    NotFound,
    /// I/O error while reading or writing the file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The file was not well-formed TOML for the expected shape.
    #[error("toml decode error: {0}")]
    Decode(#[from] toml::de::Error),
    /// The config value could not be serialized to TOML.
    #[error("toml encode error: {0}")]
    Encode(#[from] toml::ser::Error),
    /// `--locking`/the config file's `locking` field named an unknown
    /// strategy (neither `"w"` nor `"n"`).
    #[error("unknown locking strategy {0:?} (expected \"w\" or \"n\")")]
    InvalidLocking(String),
}

/// Storage port for a single raw config document, keyed by nothing but its
/// own path — unlike the teacher's `ConfigStore`, which is a per-key blob
/// store (one JSON file per named config), this server has exactly one
/// document (the merged CLI/file config), so the port drops the key.
pub trait ConfigStore {
    /// Loads the raw file contents. Returns [`ConfigError::NotFound`] if
    /// no file is present.
    fn load_raw(&self) -> Result<Vec<u8>, ConfigError>;
    /// Persists raw file contents, creating parent directories as needed.
    fn save_raw(&self, data: &[u8]) -> Result<(), ConfigError>;
}

/// Stores the config document as a single TOML file at a fixed path.
pub struct FsConfigStore {
    path: PathBuf,
}

impl FsConfigStore {
    /// Builds a store rooted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path this store reads from and writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self) -> Result<Vec<u8>, ConfigError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, data: &[u8]) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsConfigStore::new(dir.path().join("vaultd.toml"));
        assert!(matches!(store.load_raw().unwrap_err(), ConfigError::NotFound));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsConfigStore::new(dir.path().join("nested/vaultd.toml"));
        store.save_raw(b"host = \"0.0.0.0\"\n").unwrap();
        assert_eq!(store.load_raw().unwrap(), b"host = \"0.0.0.0\"\n");
    }
}
