//! PIT programming and time-slice accounting (C7).
//!
//! Grounded on `examples/original_source/device/timer.c`. Channel 0 is
//! programmed for a fixed ~100 Hz rate (mode 2, 16-bit binary divisor);
//! every tick is the scheduler's only preemption point (§5: no arbitrary-
//! instruction preemption, only at the timer IRQ's return path).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::{PIT_CHANNEL0_PORT, PIT_COMMAND_PORT, PIT_OSCILLATOR_HZ, STACK_MAGIC};
use crate::port::outb;

/// Number of ticks elapsed since boot, one per ~10 ms.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Mode 2 (rate generator), access mode lobyte/hibyte, binary, channel 0.
const PIT_MODE_RATE_GENERATOR: u8 = 0x34;

/// Program the PIT and register the IRQ0 handler. Must run once, before
/// interrupts are first enabled.
pub fn init(hz: u32) {
    let divisor = (PIT_OSCILLATOR_HZ / hz) as u16;
    // SAFETY: standard PIT programming sequence on its own fixed ports.
    unsafe {
        outb(PIT_COMMAND_PORT, PIT_MODE_RATE_GENERATOR);
        outb(PIT_CHANNEL0_PORT, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0_PORT, ((divisor >> 8) & 0xFF) as u8);
    }
    crate::interrupt::register_handler(crate::interrupt::VECTOR_TIMER, handler);
    crate::interrupt::enable_irq(0);
}

/// Ticks elapsed since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// IRQ0 handler: verify the current task's stack-overflow sentinel,
/// advance the global and per-task tick counts, and decrement the current
/// task's time slice, rescheduling when it hits zero.
fn handler(_vec_no: u32) {
    let cur = crate::sched::current();
    // SAFETY: `cur` is the live current PCB; reading its sentinel word has
    // no side effect.
    let magic = unsafe { (*cur).stack_magic };
    assert!(
        magic == STACK_MAGIC,
        "kernel-stack overflow detected: PCB sentinel corrupted"
    );

    TICKS.fetch_add(1, Ordering::Relaxed);

    // SAFETY: `cur` is the live current PCB.
    unsafe {
        (*cur).elapsed_ticks += 1;
        if (*cur).ticks == 0 {
            crate::sched::scheduler::schedule();
        } else {
            (*cur).ticks -= 1;
        }
    }
}

/// Block the calling task for at least `ms` milliseconds by repeatedly
/// yielding until enough ticks have elapsed.
///
/// Each tick is ~10 ms by construction (`init` programs the PIT for
/// `PIT_FREQUENCY_HZ`); `msleep` rounds up so a request for a fraction of
/// a tick still waits a whole one.
pub fn msleep(ms: u32) {
    const MS_PER_TICK: u32 = 10;
    let sleep_ticks = ms.div_ceil(MS_PER_TICK);
    let start = ticks();
    while ticks() - start < u64::from(sleep_ticks) {
        crate::sched::scheduler::thread_yield();
    }
}

#[cfg(test)]
mod tests {
    #[test_case]
    fn ticks_only_ever_increase() {
        let before = super::ticks();
        let after = super::ticks();
        assert!(after >= before);
    }
}
