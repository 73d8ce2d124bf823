// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config file loading and CLI/file/default merge for the vault server.
//!
//! A single TOML document holds every flag the connection server accepts;
//! [`VaultConfig`] is that document's shape, [`ConfigService`] loads and
//! saves it through a [`ConfigStore`], and [`VaultConfig::merge`] /
//! [`VaultConfig::resolve`] implement the CLI-over-file-over-default
//! precedence the supervisor binary applies at startup.

mod service;
mod settings;
mod store;

pub use service::ConfigService;
pub use settings::{ResolvedConfig, VaultConfig};
pub use store::{ConfigError, ConfigStore, FsConfigStore};
