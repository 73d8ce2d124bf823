// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors raised by the lock service.

use thiserror::Error;

/// Failures while acquiring or holding a read/write lock.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired within the configured timeout.
    #[error("lock acquisition timed out")]
    Timeout,
    /// The underlying semaphore was closed, which only happens if the
    /// lock service itself is shutting down.
    #[error("lock service is shutting down")]
    Closed,
}
