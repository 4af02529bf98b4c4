//! Preemptive round-robin scheduler (C5).
//!
//! Grounded on `examples/original_source/thread/thread.c`. [`pcb`] owns the
//! task layout; [`scheduler`] owns the ready/all lists, the context switch,
//! and the block/unblock/yield API every suspension point in [`crate::sync`]
//! and [`crate::timer`] is built on.

pub mod pcb;
pub mod scheduler;

use pcb::Pcb;

/// Recover a pointer to the PCB of whichever task is currently running, by
/// masking the live stack pointer down to its page boundary.
///
/// Sound as long as every kernel stack this scheduler ever hands out is
/// exactly one page with its PCB at the base, which [`pcb::init_thread`]
/// guarantees.
pub fn current() -> *mut Pcb {
    let esp: usize;
    // SAFETY: reading `esp` has no side effect.
    unsafe {
        core::arch::asm!("mov {0}, esp", out(reg) esp, options(nomem, nostack, preserves_flags));
    }
    (esp & !(crate::config::PAGE_SIZE - 1)) as *mut Pcb
}
