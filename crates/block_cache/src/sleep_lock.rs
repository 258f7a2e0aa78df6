// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Blocking exclusive lock guarding a cache entry's payload.
//!
//! Unlike the shard locks, which are held only for a bounded metadata scan, a content lock may be
//! held across disk I/O and for as long as a caller works on a block. Contended callers are
//! therefore parked on a condition variable rather than spinning, and the lock remembers which
//! thread holds it so the cache can verify its callers' lock discipline.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

/// An exclusive lock whose waiters sleep until the holder releases it.
pub struct SleepLock<T> {
    /// The thread currently holding the lock, if any.
    holder: Mutex<Option<ThreadId>>,
    /// Signaled every time the lock is released.
    released: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: Access to `data` is only granted through a `SleepLockGuard`, and at most one guard
// exists at a time, so sharing the lock between threads is sound as long as `T` may be sent.
unsafe impl<T: Send> Sync for SleepLock<T> {}

// SAFETY: Moving the lock moves the owned `T`.
unsafe impl<T: Send> Send for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// Creates an unheld lock around `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            holder: Mutex::new(None),
            released: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, sleeping until it becomes available.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock; waiting would never end.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = thread::current().id();
        let mut holder = self.holder.lock();

        assert_ne!(*holder, Some(me), "sleep lock acquired twice by the same thread");

        while holder.is_some() {
            self.released.wait(&mut holder);
        }

        *holder = Some(me);
        SleepLockGuard::new(self)
    }

    /// Acquires the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut holder = self.holder.lock();

        if holder.is_some() {
            return None;
        }

        *holder = Some(thread::current().id());
        Some(SleepLockGuard::new(self))
    }

    /// Returns `true` if any thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    /// Returns `true` if the calling thread holds the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    fn unlock(&self) {
        let mut holder = self.holder.lock();
        debug_assert_eq!(*holder, Some(thread::current().id()));
        *holder = None;
        drop(holder);

        self.released.notify_one();
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("holder", &*self.holder.lock())
            .finish_non_exhaustive()
    }
}

/// Proof that the current thread holds a [`SleepLock`]. Releases the lock when dropped.
///
/// The guard is not `Send`: the lock is released by the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> SleepLockGuard<'a, T> {
    const fn new(lock: &'a SleepLock<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Returns the lock this guard belongs to.
    #[must_use]
    pub const fn lock(&self) -> &'a SleepLock<T> {
        self.lock
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard exists, so this thread holds the lock and no other reference to
        // the data can be live.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: As in `deref`; `&mut self` additionally rules out aliasing through this guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for SleepLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SleepLockGuard").field(&**self).finish()
    }
}
