// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The lock service: a handle shared across connections that hands out
//! read/write guards for named resources (in practice, database files).
//!
//! Crash-safety (SPEC_FULL.md §4.3) has two layers here:
//! - the primary path is the guard's [`Drop`] impl, which releases the
//!   lock even if the task holding it panics (normal Rust unwind
//!   semantics cover SIGTERM/SIGINT-triggered graceful shutdowns and
//!   any panic inside a critical section);
//! - the backstop is [`LockService::force_release`], which the
//!   connection-owning coordinator calls when it observes a holder's
//!   transport close without a matching release — the only case the
//!   `Drop` path cannot reach, a `SIGKILL`'d worker process never runs
//!   destructors.

use crate::resource::{ResourceState, Strategy};
use crate::LockError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The default ceiling on how long a single acquisition waits before
/// giving up. Not present in the original (which blocks indefinitely);
/// added so one stuck client cannot wedge a resource forever.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(20);

/// Identifies whoever is holding a lock, so it can be force-released if
/// that holder's connection disappears. In `bins/vaultd` this is the
/// connection id of the client session that issued the request.
pub type HolderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Read,
    Write,
}

struct Outstanding {
    resource: String,
    kind: Kind,
    state: Arc<ResourceState>,
}

struct Inner {
    resources: Mutex<HashMap<String, Arc<ResourceState>>>,
    outstanding: Mutex<HashMap<HolderId, Vec<Outstanding>>>,
    strategy: Strategy,
    timeout: Duration,
}

/// A shared handle to the lock service. Cheap to clone; every clone
/// refers to the same underlying resource table.
#[derive(Clone)]
pub struct LockService(Arc<Inner>);

impl LockService {
    /// Builds a service using the given strategy and the default
    /// acquisition timeout.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self::with_timeout(strategy, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Builds a service using the given strategy and acquisition
    /// timeout.
    #[must_use]
    pub fn with_timeout(strategy: Strategy, timeout: Duration) -> Self {
        Self(Arc::new(Inner {
            resources: Mutex::new(HashMap::new()),
            outstanding: Mutex::new(HashMap::new()),
            strategy,
            timeout,
        }))
    }

    async fn state_for(&self, resource: &str) -> Arc<ResourceState> {
        let mut resources = self.0.resources.lock().await;
        resources
            .entry(resource.to_owned())
            .or_insert_with(|| Arc::new(ResourceState::new(self.0.strategy)))
            .clone()
    }

    async fn track(&self, holder: HolderId, resource: &str, kind: Kind, state: Arc<ResourceState>) {
        let mut outstanding = self.0.outstanding.lock().await;
        outstanding
            .entry(holder)
            .or_default()
            .push(Outstanding {
                resource: resource.to_owned(),
                kind,
                state,
            });
    }

    async fn untrack(&self, holder: HolderId, resource: &str, kind: Kind) {
        let mut outstanding = self.0.outstanding.lock().await;
        if let Some(locks) = outstanding.get_mut(&holder) {
            locks.retain(|o| !(o.resource == resource && o.kind == kind));
            if locks.is_empty() {
                outstanding.remove(&holder);
            }
        }
    }

    /// Acquires a shared (read) lock on `resource` on behalf of `holder`.
    pub async fn acquire_read(&self, resource: &str, holder: HolderId) -> Result<ReadGuard, LockError> {
        let state = self.state_for(resource).await;
        state.start_read(self.0.timeout).await?;
        self.track(holder, resource, Kind::Read, state.clone()).await;
        Ok(ReadGuard {
            inner: Some(GuardInner {
                service: self.clone(),
                holder,
                resource: resource.to_owned(),
                state,
            }),
        })
    }

    /// Acquires an exclusive (write) lock on `resource` on behalf of
    /// `holder`.
    pub async fn acquire_write(&self, resource: &str, holder: HolderId) -> Result<WriteGuard, LockError> {
        let state = self.state_for(resource).await;
        state.start_write(self.0.timeout).await?;
        self.track(holder, resource, Kind::Write, state.clone()).await;
        Ok(WriteGuard {
            inner: Some(GuardInner {
                service: self.clone(),
                holder,
                resource: resource.to_owned(),
                state,
            }),
        })
    }

    /// Force-releases every lock still outstanding for `holder`.
    ///
    /// Called by the connection coordinator when a holder's transport
    /// closes without the holder ever releasing its locks cleanly — the
    /// backstop for a worker that dies by `SIGKILL`.
    pub async fn force_release(&self, holder: HolderId) {
        let locks = {
            let mut outstanding = self.0.outstanding.lock().await;
            outstanding.remove(&holder).unwrap_or_default()
        };
        for lock in locks {
            tracing::warn!(
                resource = %lock.resource,
                holder,
                "force-releasing lock for a holder whose connection closed"
            );
            match lock.kind {
                Kind::Read => lock.state.end_read().await,
                Kind::Write => lock.state.end_write().await,
            }
        }
    }
}

struct GuardInner {
    service: LockService,
    holder: HolderId,
    resource: String,
    state: Arc<ResourceState>,
}

/// A held shared (read) lock. Releases on [`ReadGuard::release`] or,
/// failing that, when dropped.
pub struct ReadGuard {
    inner: Option<GuardInner>,
}

impl ReadGuard {
    /// Releases the lock, awaiting the full release protocol rather than
    /// leaving it to a spawned cleanup task.
    pub async fn release(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.state.end_read().await;
            inner.service.untrack(inner.holder, &inner.resource, Kind::Read).await;
        }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tokio::spawn(async move {
                inner.state.end_read().await;
                inner.service.untrack(inner.holder, &inner.resource, Kind::Read).await;
            });
        }
    }
}

/// A held exclusive (write) lock. Releases on [`WriteGuard::release`]
/// or, failing that, when dropped.
pub struct WriteGuard {
    inner: Option<GuardInner>,
}

impl WriteGuard {
    /// Releases the lock, awaiting the full release protocol rather than
    /// leaving it to a spawned cleanup task.
    pub async fn release(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.state.end_write().await;
            inner.service.untrack(inner.holder, &inner.resource, Kind::Write).await;
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tokio::spawn(async move {
                inner.state.end_write().await;
                inner.service.untrack(inner.holder, &inner.resource, Kind::Write).await;
            });
        }
    }
}
