//! Reentrant mutex (C6).
//!
//! Grounded on `examples/original_source/thread/sync.c`'s `lock_acquire`/
//! `lock_release`. Built directly on [`super::Semaphore`] with `value = 1`;
//! the only addition is tracking `holder` and a repeat count so the owning
//! task can acquire it again without deadlocking itself.

use core::ptr;

use crate::sched::pcb::Pcb;
use crate::sync::Semaphore;

/// A mutex a task may acquire more than once, as long as every acquire is
/// matched by a release.
pub struct Mutex {
    sem: Semaphore,
    holder: spin::Mutex<*mut Pcb>,
    holder_repeat_nr: spin::Mutex<u32>,
}

// SAFETY: `holder`/`holder_repeat_nr` are only ever read/written by the
// thread that currently holds (or is contending for) the mutex, each under
// its own `spin::Mutex`; the raw `*mut Pcb` is never dereferenced here.
unsafe impl Sync for Mutex {}

impl Mutex {
    /// A fresh, unheld mutex.
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            holder: spin::Mutex::new(ptr::null_mut()),
            holder_repeat_nr: spin::Mutex::new(0),
        }
    }

    /// Wire up the underlying semaphore's waiter list. Must run once,
    /// after `self` has reached its final address.
    pub fn init(&self) {
        self.sem.init();
    }

    /// Acquire the mutex, blocking if another task currently holds it.
    /// Safe to call again from the same task that already holds it.
    pub fn acquire(&self) {
        let cur = crate::sched::current();
        if *self.holder.lock() != cur {
            self.sem.down();
            *self.holder.lock() = cur;
            *self.holder_repeat_nr.lock() = 1;
        } else {
            *self.holder_repeat_nr.lock() += 1;
        }
    }

    /// Release one level of the current task's hold.
    ///
    /// # Panics
    /// Asserts the caller is the current holder.
    pub fn release(&self) {
        let cur = crate::sched::current();
        assert!(*self.holder.lock() == cur, "lock_release: caller does not hold this mutex");
        let mut repeat = self.holder_repeat_nr.lock();
        if *repeat > 1 {
            *repeat -= 1;
            return;
        }
        *repeat = 0;
        drop(repeat);
        *self.holder.lock() = ptr::null_mut();
        self.sem.up();
    }

    /// `true` if the current task holds this mutex (at any repeat depth).
    pub fn held_by_current(&self) -> bool {
        *self.holder.lock() == crate::sched::current()
    }

    /// Current repeat depth (0 if not held by the caller).
    pub fn repeat_depth(&self) -> u32 {
        if self.held_by_current() {
            *self.holder_repeat_nr.lock()
        } else {
            0
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Mutex;

    #[test_case]
    fn reentrant_acquire_tracks_depth() {
        let m = Mutex::new();
        m.init();
        m.acquire();
        assert_eq!(m.repeat_depth(), 1);
        m.acquire();
        assert_eq!(m.repeat_depth(), 2);
        m.release();
        assert_eq!(m.repeat_depth(), 1);
        m.release();
        assert_eq!(m.repeat_depth(), 0);
        assert!(!m.held_by_current());
    }
}
