// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Readers/writers admission strategies for a single named resource.
//!
//! Both strategies are direct ports of the semaphore algebra in the
//! original protocol's lock strategies, substituting `tokio::sync`
//! primitives for `multiprocessing.Semaphore`: a binary semaphore is a
//! [`Semaphore`] started with one permit, acquired with
//! [`Semaphore::acquire`] (or `acquire_owned`) and "released" by a
//! *different* call site via [`Semaphore::add_permits`] — the same
//! acquire-here, release-there shape the Python originals rely on.
//! Tokio's counters (`mutex1`/`mutex2` in the writer-preference source)
//! are represented directly as `tokio::sync::Mutex`-guarded counters,
//! since holding the guard across the critical section *is* the mutex.

use crate::LockError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// "Problem 2" readers-writers: concurrent readers block new writers;
/// once a writer is waiting, no new reader group is admitted until it
/// has run. Ported from
/// `examples/original_source/hurray/swmr/strategies/writer_preference.py`.
#[derive(Debug)]
pub struct WriterPreference {
    mutex3: Semaphore,
    r: Semaphore,
    w: Semaphore,
    rcnt: Mutex<u64>,
    wcnt: Mutex<u64>,
}

impl Default for WriterPreference {
    fn default() -> Self {
        Self {
            mutex3: Semaphore::new(1),
            r: Semaphore::new(1),
            w: Semaphore::new(1),
            rcnt: Mutex::new(0),
            wcnt: Mutex::new(0),
        }
    }
}

impl WriterPreference {
    pub async fn start_read(&self, acquire_timeout: Duration) -> Result<(), LockError> {
        let _mutex3 = self.mutex3.acquire().await.map_err(|_| LockError::Closed)?;
        let _r = self.r.acquire().await.map_err(|_| LockError::Closed)?;
        let mut rcnt = self.rcnt.lock().await;
        let first = *rcnt == 0;
        if first {
            let permit = timeout(acquire_timeout, self.w.acquire())
                .await
                .map_err(|_| LockError::Timeout)?
                .map_err(|_| LockError::Closed)?;
            permit.forget();
        }
        *rcnt += 1;
        Ok(())
    }

    pub async fn end_read(&self) {
        let mut rcnt = self.rcnt.lock().await;
        *rcnt = rcnt.saturating_sub(1);
        if *rcnt == 0 {
            self.w.add_permits(1);
        }
    }

    pub async fn start_write(&self, acquire_timeout: Duration) -> Result<(), LockError> {
        let mut wcnt = self.wcnt.lock().await;
        *wcnt += 1;
        let first = *wcnt == 1;
        if first {
            match timeout(acquire_timeout, self.r.acquire()).await {
                Ok(Ok(permit)) => permit.forget(),
                _ => {
                    *wcnt = wcnt.saturating_sub(1);
                    return Err(LockError::Timeout);
                }
            }
        }
        match timeout(acquire_timeout, self.w.acquire()).await {
            Ok(Ok(permit)) => permit.forget(),
            _ => {
                if first {
                    self.r.add_permits(1);
                }
                *wcnt = wcnt.saturating_sub(1);
                return Err(LockError::Timeout);
            }
        }
        Ok(())
    }

    pub async fn end_write(&self) {
        self.w.add_permits(1);
        let mut wcnt = self.wcnt.lock().await;
        *wcnt = wcnt.saturating_sub(1);
        if *wcnt == 0 {
            self.r.add_permits(1);
        }
    }
}

/// The "third readers-writers problem": readers and writers are admitted
/// in strict arrival order, so neither can starve the other. Ported from
/// `examples/original_source/hurray/swmr/strategies/no_starve.py`.
#[derive(Debug)]
pub struct NoStarve {
    access: Semaphore,
    readers: Semaphore,
    order: Semaphore,
    rds: Mutex<u64>,
}

impl Default for NoStarve {
    fn default() -> Self {
        Self {
            access: Semaphore::new(1),
            readers: Semaphore::new(1),
            order: Semaphore::new(1),
            rds: Mutex::new(0),
        }
    }
}

impl NoStarve {
    pub async fn start_read(&self, acquire_timeout: Duration) -> Result<(), LockError> {
        let _order = self.order.acquire().await.map_err(|_| LockError::Closed)?;
        let _readers = self.readers.acquire().await.map_err(|_| LockError::Closed)?;
        let mut rds = self.rds.lock().await;
        if *rds == 0 {
            let permit = timeout(acquire_timeout, self.access.acquire())
                .await
                .map_err(|_| LockError::Timeout)?
                .map_err(|_| LockError::Closed)?;
            permit.forget();
        }
        *rds += 1;
        Ok(())
    }

    pub async fn end_read(&self) -> Result<(), LockError> {
        let _readers = self.readers.acquire().await.map_err(|_| LockError::Closed)?;
        let mut rds = self.rds.lock().await;
        *rds = rds.saturating_sub(1);
        if *rds == 0 {
            self.access.add_permits(1);
        }
        Ok(())
    }

    pub async fn start_write(&self, acquire_timeout: Duration) -> Result<(), LockError> {
        let _order = self.order.acquire().await.map_err(|_| LockError::Closed)?;
        let permit = timeout(acquire_timeout, self.access.acquire())
            .await
            .map_err(|_| LockError::Timeout)?
            .map_err(|_| LockError::Closed)?;
        permit.forget();
        Ok(())
    }

    pub async fn end_write(&self) {
        self.access.add_permits(1);
    }
}
