//! Counting semaphore (C6).
//!
//! Grounded on `examples/original_source/thread/sync.c`'s `sema_down`/
//! `sema_up`. A semaphore is just a counter plus a waiter list; every
//! mutation runs with interrupts disabled so the timer IRQ cannot observe
//! (or corrupt) a half-updated `value`/`waiters` pair.

use crate::elem2entry;
use crate::interrupt;
use crate::list::List;
use crate::sched::pcb::{Pcb, Status};
use crate::sched::scheduler;

/// Counting semaphore, initial value caller-supplied (0 for signaling, 1
/// for mutual exclusion).
pub struct Semaphore {
    value: spin::Mutex<u8>,
    waiters: spin::Mutex<List>,
}

impl Semaphore {
    /// Build a semaphore with `value`. Callers embedding one in a `static`
    /// must call [`Semaphore::init`] once before first use.
    pub const fn new(value: u8) -> Self {
        Self {
            value: spin::Mutex::new(value),
            waiters: spin::Mutex::new(List::new()),
        }
    }

    /// Wire up the waiter-list sentinels. Must run once, after `self` has
    /// reached its final (non-moving) address.
    pub fn init(&self) {
        self.waiters.lock().init();
    }

    /// Block until `value > 0`, then decrement it.
    ///
    /// # Panics
    /// Asserts (debug-only) that interrupts are disabled on entry is not
    /// required here: this is itself the entry point that disables them,
    /// matching `sema_down`'s own `intr_disable` call rather than asserting
    /// the caller already did.
    pub fn down(&self) {
        loop {
            let old = interrupt::disable();
            if *self.value.lock() == 0 {
                let cur = crate::sched::current();
                // SAFETY: `cur` is the live current PCB; its `general_tag`
                // is detached (a running thread is in no list).
                unsafe {
                    self.waiters
                        .lock()
                        .append(core::ptr::addr_of_mut!((*cur).general_tag));
                }
                scheduler::thread_block(Status::Waiting);
                // Woken by `up`; re-examine `value` from the top rather
                // than assuming it is now nonzero (another waiter may have
                // raced us, mirroring the reference's `while` loop instead
                // of a plain `if`).
                interrupt::set_status(old);
                continue;
            }
            *self.value.lock() -= 1;
            interrupt::set_status(old);
            break;
        }
    }

    /// Increment `value`, waking the longest-waiting blocked task if any.
    pub fn up(&self) {
        let old = interrupt::disable();
        if let Some(elem) = self.waiters.lock().pop() {
            let pcb: *mut Pcb = elem2entry!(Pcb, general_tag, elem);
            // SAFETY: `pcb` was linked into `waiters` by `down` above,
            // which only ever parks a thread currently in `Status::Waiting`.
            unsafe { scheduler::thread_unblock(pcb) };
        }
        *self.value.lock() += 1;
        interrupt::set_status(old);
    }

    /// Current value, for diagnostics and tests only.
    pub fn value(&self) -> u8 {
        *self.value.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::Semaphore;

    #[test_case]
    fn fresh_semaphore_reports_its_initial_value() {
        let sem = Semaphore::new(3);
        sem.init();
        assert_eq!(sem.value(), 3);
    }

    #[test_case]
    fn down_up_on_a_nonzero_semaphore_is_a_round_trip() {
        let sem = Semaphore::new(1);
        sem.init();
        sem.down();
        assert_eq!(sem.value(), 0);
        sem.up();
        assert_eq!(sem.value(), 1);
    }
}
