//! # Lock Ordering Discipline and the Mark Bitmap Spin Lock
//!
//! The collector uses three kinds of locks. They must be acquired in
//! increasing level:
//!
//! | Level | Lock Type        | Description                                  |
//! |-------|------------------|----------------------------------------------|
//! | 1     | `Cycle`          | Whole-cycle lock guarding the pressure flag  |
//! | 2     | `HeapContainer`  | Object, array and monitor containers, roots  |
//! | 3     | `MarkBitmap`     | Per-kind mark bitmap spin locks              |
//!
//! Same-level acquisitions are allowed. Acquiring a lower level while a higher
//! one is held is a bug and panics in debug builds:
//!
//! ```ignore,should_panic
//! let _bitmap = LockGuard::new(LockOrder::MarkBitmap);
//! let _heap = LockGuard::new(LockOrder::HeapContainer); // WRONG
//! ```
//!
//! The safepoint barrier is only ever taken by mutator threads while they hold
//! none of the locks above, so it does not take part in the ordering.

use std::cell::{RefCell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

const MAX_LOCK_DEPTH: usize = 16;

thread_local! {
    static HELD_LOCKS: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(MAX_LOCK_DEPTH));
}

/// Lock order tags for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockOrder {
    /// Collector cycle lock (level 1).
    Cycle = 1,
    /// Heap container and root slot locks (level 2).
    HeapContainer = 2,
    /// Mark bitmap spin locks (level 3).
    MarkBitmap = 3,
}

impl LockOrder {
    /// The acquisition level of this lock type.
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }
}

/// RAII marker recording that the current thread holds a lock of the given
/// level. Validates the acquisition order in debug builds and is free in
/// release builds.
#[must_use = "LockGuard must be held for the duration of the critical section"]
pub struct LockGuard {
    tag: LockOrder,
}

impl LockGuard {
    /// Record the acquisition of a lock of level `tag`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if a lock of a higher level is already held by
    /// this thread.
    pub fn new(tag: LockOrder) -> Self {
        #[cfg(debug_assertions)]
        {
            validate_lock_order(tag, current_lock_level());
            let _ = HELD_LOCKS.try_with(|held| held.borrow_mut().push(tag.level()));
        }
        Self { tag }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let level = self.tag.level();
            let _ = HELD_LOCKS.try_with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held.iter().rposition(|&l| l == level) {
                    held.remove(pos);
                }
            });
        }
    }
}

/// Highest lock level currently held by this thread, `0` when none.
#[must_use]
pub fn current_lock_level() -> u8 {
    HELD_LOCKS
        .try_with(|held| held.borrow().iter().copied().max().unwrap_or(0))
        .unwrap_or(0)
}

/// Check that a lock of `tag` may be taken while `held_level` is held.
///
/// # Panics
///
/// Panics in debug builds on a downgrade.
#[inline]
pub fn validate_lock_order(tag: LockOrder, held_level: u8) {
    debug_assert!(
        tag.level() >= held_level,
        "Lock ordering violation: {tag:?} (level {}) cannot be acquired while holding a level {held_level} lock",
        tag.level(),
    );
}

/// A busy-wait lock for very short, very frequent critical sections.
///
/// Mark bitmap insertions are a handful of instructions long and happen once
/// per reachable entry, so parking a thread would cost more than spinning.
/// Contended waiters back off with [`Backoff::snooze`], which yields to the
/// scheduler once spinning stops paying off.
pub struct SpinLock<T> {
    locked: CachePadded<AtomicBool>,
    order: LockOrder,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`; the guard hands out
// references only while the flag is held.
unsafe impl<T: Send> Send for SpinLock<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create an unlocked spin lock participating at level `order`.
    pub const fn new(value: T, order: LockOrder) -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
            order,
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it is free.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let order = LockGuard::new(self.order);
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
        SpinLockGuard {
            lock: self,
            _order: order,
        }
    }

    /// Acquire the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let order = LockGuard::new(self.order);
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard {
                lock: self,
                _order: order,
            })
    }

    /// Returns `true` if some thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default(), LockOrder::MarkBitmap)
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`SpinLock::lock`]. Releases the lock on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _order: LockGuard,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::{current_lock_level, LockGuard, LockOrder, SpinLock};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_order_levels() {
        assert_eq!(LockOrder::Cycle.level(), 1);
        assert_eq!(LockOrder::HeapContainer.level(), 2);
        assert_eq!(LockOrder::MarkBitmap.level(), 3);
    }

    #[test]
    fn test_lock_guard_valid_order() {
        let _cycle = LockGuard::new(LockOrder::Cycle);
        let _heap = LockGuard::new(LockOrder::HeapContainer);
        let _heap_again = LockGuard::new(LockOrder::HeapContainer);
        let _bitmap = LockGuard::new(LockOrder::MarkBitmap);
    }

    #[test]
    fn test_lock_guard_state_restored_after_drop() {
        {
            let _bitmap = LockGuard::new(LockOrder::MarkBitmap);
        }
        assert_eq!(current_lock_level(), 0);
        let _cycle = LockGuard::new(LockOrder::Cycle);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Lock ordering violation")]
    fn test_cannot_take_heap_container_while_holding_bitmap() {
        let _bitmap = LockGuard::new(LockOrder::MarkBitmap);
        let _heap = LockGuard::new(LockOrder::HeapContainer);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Lock ordering violation")]
    fn test_cannot_take_cycle_while_holding_heap_container() {
        let _heap = LockGuard::new(LockOrder::HeapContainer);
        let _cycle = LockGuard::new(LockOrder::Cycle);
    }

    #[test]
    fn test_spin_lock_excludes_concurrent_writers() {
        let counter = Arc::new(SpinLock::new(0usize, LockOrder::MarkBitmap));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*counter.lock(), 8000);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = SpinLock::new(Vec::<u32>::new(), LockOrder::MarkBitmap);
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
