// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors the storage layer can raise.
//!
//! Variant names mirror the status codes they are mapped to in
//! `echo-vault-dispatch`, so the mapping is mechanical rather than
//! something the dispatcher has to reconstruct by reading messages.

use thiserror::Error;

/// Failures from opening, reading, or mutating a database container.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk container was corrupt or not a container file at all.
    #[error("corrupt database file: {0}")]
    Corrupt(#[from] bincode::Error),
    /// `create_db` named a file that already exists.
    #[error("database already exists")]
    FileExists,
    /// The named database file does not exist.
    #[error("database not found")]
    FileNotFound,
    /// `create_group`/`create_dataset` found an incompatible node already
    /// at that path.
    #[error("group already exists at this path")]
    GroupExists,
    /// `create_dataset` found a dataset already at that path.
    #[error("dataset already exists at this path")]
    DatasetExists,
    /// The referenced group/dataset/attribute does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// An argument value was syntactically valid but semantically wrong.
    #[error("value error: {0}")]
    ValueError(String),
    /// An operation targeted a node of the wrong kind.
    #[error("type error: {0}")]
    TypeError(String),
    /// An attribute lookup used a key that is not present.
    #[error("key not found: {0}")]
    KeyError(String),
    /// `require_dataset` found an existing dataset whose shape/dtype
    /// does not match what was requested.
    #[error("incompatible data: {0}")]
    IncompatibleData(String),
    /// A path argument was not a well-formed absolute slash path.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The per-file lock guarding this operation could not be acquired.
    #[error("lock error: {0}")]
    Lock(#[from] echo_vault_lock::LockError),
}
