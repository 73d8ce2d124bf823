// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Thin service that (de)serializes a config value and delegates storage
//! to a [`ConfigStore`].

use crate::store::{ConfigError, ConfigStore};
use serde::{de::DeserializeOwned, Serialize};

/// Wraps a [`ConfigStore`] with TOML (de)serialization.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Builds a service over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Loads and parses the config document, or `None` if no file is
    /// present.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, ConfigError> {
        match self.store.load_raw() {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Ok(Some(toml::from_str(&text)?))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Serializes and persists `value` as the config document.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(value)?;
        self.store.save_raw(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsConfigStore;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        host: String,
        port: u16,
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::new(dir.path().join("vaultd.toml")));
        let loaded: Option<Sample> = service.load().unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let service = ConfigService::new(FsConfigStore::new(dir.path().join("vaultd.toml")));
        let value = Sample { host: "0.0.0.0".to_owned(), port: 2222 };
        service.save(&value).unwrap();
        assert_eq!(service.load::<Sample>().unwrap(), Some(value));
    }
}
