// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! Everything in here busy-waits: the packet path may not sleep, and
//! no primitive here parks the calling thread. Both locks wrap the
//! `spin` crate.
use core::fmt;
use core::ops::Deref;
use core::ops::DerefMut;

/// A spin mutex.
///
/// We name it `KSpinLock` to make it obvious this is not the `Mutex`
/// from std: a contended `lock()` spins on the CPU rather than
/// sleeping. Critical sections must be short.
pub struct KSpinLock<T> {
    inner: spin::Mutex<T>,
}

pub struct KSpinLockGuard<'a, T: 'a> {
    guard: spin::MutexGuard<'a, T>,
}

impl<T> Deref for KSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T: Default> Default for KSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> KSpinLock<T> {
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub const fn new(val: T) -> Self {
        KSpinLock { inner: spin::Mutex::new(val) }
    }

    /// Acquire the lock, spinning until it is available. The lock is
    /// released when the guard is dropped.
    pub fn lock(&self) -> KSpinLockGuard<'_, T> {
        KSpinLockGuard { guard: self.inner.lock() }
    }

    /// Acquire the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<KSpinLockGuard<'_, T>> {
        self.inner.try_lock().map(|guard| KSpinLockGuard { guard })
    }
}

impl<T: fmt::Debug> fmt::Debug for KSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "KSpinLock({:?})", *guard),
            None => write!(f, "KSpinLock(<locked>)"),
        }
    }
}

/// A spinning reader/writer lock.
///
/// Any number of readers may hold the lock at once; a writer holds it
/// alone. A thread must never take the read side recursively while a
/// writer may be waiting.
pub struct KRwLock<T> {
    inner: spin::RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: spin::RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: spin::RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T: Default> Default for KRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> KRwLock<T> {
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub const fn new(val: T) -> Self {
        KRwLock { inner: spin::RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        KRwLockReadGuard { guard: self.inner.read() }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        KRwLockWriteGuard { guard: self.inner.write() }
    }
}
