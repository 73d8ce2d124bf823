// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cross-process readers/writers lock service for the vault server.
//!
//! One [`LockService`] handle, shared across every connection in the
//! supervisor process, hands out [`ReadGuard`]/[`WriteGuard`] values per
//! named resource (a database file path). Two admission algorithms are
//! available, selected once at startup by [`Strategy`]: both are ports
//! of the semaphore algebra in the original protocol's lock strategies
//! (see `strategy` module docs).

mod error;
mod resource;
mod service;
mod strategy;

pub use error::LockError;
pub use resource::Strategy;
pub use service::{HolderId, LockService, ReadGuard, WriteGuard, DEFAULT_ACQUIRE_TIMEOUT};
