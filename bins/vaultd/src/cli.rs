// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command-line flags mirroring the CLI flag table (SPEC_FULL.md §6).
//!
//! Every flag is `Option`-typed and left without a `clap` default so an
//! absent flag can fall through to the config file and then to
//! [`echo_vault_config::VaultConfig::resolve`]'s built-in defaults, rather
//! than clap silently filling in a value the file should have been able to
//! override.

use clap::Parser;
use echo_vault_config::VaultConfig;
use std::path::PathBuf;

/// `vaultd` — the vault server's connection daemon.
#[derive(Parser, Debug)]
#[command(author, version, about = "Hierarchical array vault connection server")]
pub struct Args {
    /// TCP listen host.
    #[arg(long)]
    pub host: Option<String>,
    /// TCP listen port; `0` disables the TCP listener.
    #[arg(long)]
    pub port: Option<u16>,
    /// Unix-domain socket path.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Worker processes to run; `0` means one per available core.
    #[arg(long)]
    pub processes: Option<usize>,
    /// Pipeline depth (concurrent requests in flight) per worker process.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Lock admission strategy: `w` (writer-preference) or `n` (no-starve).
    #[arg(long)]
    pub locking: Option<String>,
    /// Base directory every database file is resolved against.
    #[arg(long)]
    pub base: Option<PathBuf>,
    /// Path to a TOML config file; merged under these CLI flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Lower the default log level from `info` to `debug`.
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// This invocation's flags as a [`VaultConfig`] overlay, `debug` only
    /// set when the flag was actually passed (so an absent `--debug` does
    /// not shadow a file-configured `debug = true`).
    #[must_use]
    pub fn as_overlay(&self) -> VaultConfig {
        VaultConfig {
            host: self.host.clone(),
            port: self.port,
            socket: self.socket.clone(),
            processes: self.processes,
            workers: self.workers,
            locking: self.locking.clone(),
            base: self.base.clone(),
            debug: self.debug.then_some(true),
        }
    }
}
