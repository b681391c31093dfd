// SPDX-License-Identifier: GPL-3.0-only

//! RAII scoped lock (C2) with early release, mirroring `MutexLock::relock` from
//! the socket layer this protocol was distilled from: block on contention,
//! trace it, and let the caller release before a network send rather than
//! holding the lock across I/O.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::trace;

/// Holds at most one lock on `mutex`, acquired and released explicitly.
///
/// Starts unlocked. `acquire()` may be called again after `release()`.
/// Dropping while held releases automatically.
pub struct ScopedLock<'a, T> {
    mutex: &'a Mutex<T>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T> ScopedLock<'a, T> {
    pub fn new(mutex: &'a Mutex<T>) -> Self {
        Self { mutex, guard: None }
    }

    /// Locks the mutex, blocking if contended. Logs a trace on contention so
    /// it's visible that a caller waited rather than acquiring immediately.
    pub fn acquire(&mut self) -> &mut T {
        if self.guard.is_none() {
            self.guard = Some(match self.mutex.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    trace!("mutex is already locked, waiting in line");
                    self.mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
                }
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            });
        }
        self.guard.as_mut().unwrap()
    }

    /// Unlocks if currently held. A no-op if already released.
    pub fn release(&mut self) {
        self.guard = None;
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl<T> Drop for ScopedLock<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}
