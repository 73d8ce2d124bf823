// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The vault server's config shape (SPEC_FULL.md §6 CLI flag table, §10
//! ambient stack): every field optional so a TOML file can set any subset
//! of them, merged against CLI flags and built-in defaults.

use crate::store::ConfigError;
use echo_vault_lock::Strategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The config document, as read from a TOML file or assembled from CLI
/// flags. All fields optional; `merge` applies CLI-over-file-over-default
/// precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VaultConfig {
    /// `--host`.
    pub host: Option<String>,
    /// `--port`; `Some(0)` disables the TCP listener.
    pub port: Option<u16>,
    /// `--socket`.
    pub socket: Option<PathBuf>,
    /// `--processes`; `Some(0)` means "one per available core".
    pub processes: Option<usize>,
    /// `--workers`, the pipeline depth per worker process.
    pub workers: Option<usize>,
    /// `--locking`: `"w"` for writer-preference, `"n"` for no-starve.
    pub locking: Option<String>,
    /// `--base`, the data directory.
    pub base: Option<PathBuf>,
    /// `--debug`.
    pub debug: Option<bool>,
}

impl VaultConfig {
    /// Overlays `self` (higher precedence, typically CLI flags) on top of
    /// `file` (lower precedence, typically a loaded config file): every
    /// field present in `self` wins, otherwise `file`'s value is used.
    #[must_use]
    pub fn merge(self, file: Self) -> Self {
        Self {
            host: self.host.or(file.host),
            port: self.port.or(file.port),
            socket: self.socket.or(file.socket),
            processes: self.processes.or(file.processes),
            workers: self.workers.or(file.workers),
            locking: self.locking.or(file.locking),
            base: self.base.or(file.base),
            debug: self.debug.or(file.debug),
        }
    }

    /// Fills every remaining `None` field with this server's built-in
    /// defaults and parses the `locking` flag into a [`Strategy`],
    /// producing a config with nothing left to resolve.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let locking = self.locking.as_deref().unwrap_or("w");
        let locking = match locking {
            "w" => Strategy::WriterPreference,
            "n" => Strategy::NoStarve,
            other => return Err(ConfigError::InvalidLocking(other.to_owned())),
        };
        Ok(ResolvedConfig {
            host: self.host.unwrap_or_else(|| "localhost".to_owned()),
            port: self.port.unwrap_or(2222),
            socket: self.socket,
            processes: self.processes.unwrap_or(0),
            workers: self.workers.unwrap_or(1),
            locking,
            base: self.base.unwrap_or_else(|| PathBuf::from("./vault-data")),
            debug: self.debug.unwrap_or(false),
        })
    }
}

/// A [`VaultConfig`] with every field defaulted and `locking` parsed —
/// what the connection server actually starts up with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// TCP listen host.
    pub host: String,
    /// TCP listen port; `0` disables the TCP listener.
    pub port: u16,
    /// Unix-domain socket path, if any.
    pub socket: Option<PathBuf>,
    /// Worker processes to spawn; `0` means "one per available core".
    pub processes: usize,
    /// Pipeline depth per worker process.
    pub workers: usize,
    /// The chosen lock admission strategy.
    pub locking: Strategy,
    /// Data directory every database file is resolved against.
    pub base: PathBuf,
    /// Whether to lower the default log level from `info` to `debug`.
    pub debug: bool,
}

impl ResolvedConfig {
    /// Worker-process count with `0` ("one per core") resolved against
    /// the host's available parallelism.
    #[must_use]
    pub fn resolved_processes(&self) -> usize {
        if self.processes == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.processes
        }
    }
}
