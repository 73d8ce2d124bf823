// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A single named resource's lock state, under whichever strategy the
//! server was started with.

use crate::strategy::{NoStarve, WriterPreference};
use crate::LockError;
use std::time::Duration;

/// Which admission algorithm a [`crate::LockService`] applies to every
/// resource it manages.
///
/// Chosen once at startup (the `--locking` CLI flag) and shared by every
/// resource; the original protocol's `SWMRSync.set_strategy` is likewise
/// a single global choice, not per-database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Writers take priority: once one is waiting, no new reader group
    /// is admitted.
    WriterPreference,
    /// Readers and writers are admitted in strict arrival order.
    NoStarve,
}

/// Per-resource lock state, named after the strategy so `LockService`
/// never has to know which algorithm is underneath.
#[derive(Debug)]
pub(crate) enum ResourceState {
    WriterPreference(WriterPreference),
    NoStarve(NoStarve),
}

impl ResourceState {
    pub(crate) fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::WriterPreference => Self::WriterPreference(WriterPreference::default()),
            Strategy::NoStarve => Self::NoStarve(NoStarve::default()),
        }
    }

    pub(crate) async fn start_read(&self, timeout: Duration) -> Result<(), LockError> {
        match self {
            Self::WriterPreference(s) => s.start_read(timeout).await,
            Self::NoStarve(s) => s.start_read(timeout).await,
        }
    }

    pub(crate) async fn end_read(&self) {
        match self {
            Self::WriterPreference(s) => s.end_read().await,
            Self::NoStarve(s) => {
                if let Err(err) = s.end_read().await {
                    tracing::error!(%err, "no-starve end_read failed; resource may be stuck");
                }
            }
        }
    }

    pub(crate) async fn start_write(&self, timeout: Duration) -> Result<(), LockError> {
        match self {
            Self::WriterPreference(s) => s.start_write(timeout).await,
            Self::NoStarve(s) => s.start_write(timeout).await,
        }
    }

    pub(crate) async fn end_write(&self) {
        match self {
            Self::WriterPreference(s) => s.end_write().await,
            Self::NoStarve(s) => s.end_write().await,
        }
    }
}
