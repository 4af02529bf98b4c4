//! Bounded single-producer/single-consumer byte queue (C6).
//!
//! Grounded on `examples/original_source/device/ioqueue.c`/`ioqueue.h`. The
//! keyboard IRQ handler is the sole producer and the console/shell read
//! path is the sole consumer; a 64-byte circular buffer with one slot kept
//! permanently empty disambiguates full from empty without a separate
//! counter. Both endpoints require interrupts already disabled by the
//! caller, matching §5's discipline.

use crate::sched::pcb::{Pcb, Status};
use crate::sched::scheduler;
use crate::sync::Mutex;

const BUF_LEN: usize = 64;

/// A 64-byte circular byte pipe with exactly one producer and one consumer.
pub struct IoQueue {
    mutex: Mutex,
    buf: spin::Mutex<[u8; BUF_LEN]>,
    head: spin::Mutex<usize>,
    tail: spin::Mutex<usize>,
    producer: spin::Mutex<*mut Pcb>,
    consumer: spin::Mutex<*mut Pcb>,
}

// SAFETY: every `*mut Pcb` waiter slot is only ever written by the task
// that owns it (the current producer or consumer) while holding `mutex`,
// and read back the same way; the pointer itself is never dereferenced
// outside `thread_unblock`'s own contract.
unsafe impl Sync for IoQueue {}

fn next(pos: usize) -> usize {
    (pos + 1) % BUF_LEN
}

impl IoQueue {
    /// A fresh, empty queue.
    pub const fn new() -> Self {
        Self {
            mutex: Mutex::new(),
            buf: spin::Mutex::new([0; BUF_LEN]),
            head: spin::Mutex::new(0),
            tail: spin::Mutex::new(0),
            producer: spin::Mutex::new(core::ptr::null_mut()),
            consumer: spin::Mutex::new(core::ptr::null_mut()),
        }
    }

    /// Wire up the internal mutex's waiter list. Must run once, after
    /// `self` has reached its final address.
    pub fn init(&self) {
        self.mutex.init();
    }

    fn is_full(&self) -> bool {
        next(*self.head.lock()) == *self.tail.lock()
    }

    /// `true` if the queue holds no bytes.
    pub fn is_empty(&self) -> bool {
        *self.head.lock() == *self.tail.lock()
    }

    /// Push one byte, blocking while the buffer is full.
    ///
    /// # Preconditions
    /// Interrupts must already be disabled by the caller (§5; this is the
    /// keyboard IRQ handler's own context, which always satisfies it).
    pub fn putchar(&self, byte: u8) {
        while self.is_full() {
            self.mutex.acquire();
            *self.producer.lock() = crate::sched::current();
            self.mutex.release();
            scheduler::thread_block(Status::Blocked);
        }

        let mut buf = self.buf.lock();
        let mut head = self.head.lock();
        buf[*head] = byte;
        *head = next(*head);
        drop(head);
        drop(buf);

        let mut consumer = self.consumer.lock();
        if !consumer.is_null() {
            let waiter = *consumer;
            *consumer = core::ptr::null_mut();
            drop(consumer);
            // SAFETY: `waiter` was stashed by `getchar` right before it
            // blocked in `Status::Blocked`, and is cleared here exactly
            // once, so it cannot be unblocked twice.
            unsafe { scheduler::thread_unblock(waiter) };
        }
    }

    /// Pop one byte, blocking while the buffer is empty.
    ///
    /// # Preconditions
    /// Interrupts must already be disabled by the caller.
    pub fn getchar(&self) -> u8 {
        while self.is_empty() {
            self.mutex.acquire();
            *self.consumer.lock() = crate::sched::current();
            self.mutex.release();
            scheduler::thread_block(Status::Blocked);
        }

        let mut buf = self.buf.lock();
        let mut tail = self.tail.lock();
        let byte = buf[*tail];
        *tail = next(*tail);
        drop(tail);
        drop(buf);

        let mut producer = self.producer.lock();
        if !producer.is_null() {
            let waiter = *producer;
            *producer = core::ptr::null_mut();
            drop(producer);
            // SAFETY: see `putchar`'s symmetric comment.
            unsafe { scheduler::thread_unblock(waiter) };
        }

        byte
    }

    /// Number of bytes currently buffered, for diagnostics and tests.
    pub fn len(&self) -> usize {
        let head = *self.head.lock();
        let tail = *self.tail.lock();
        (head + BUF_LEN - tail) % BUF_LEN
    }
}

impl Default for IoQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::IoQueue;

    #[test_case]
    fn putchar_getchar_preserves_byte_value() {
        let q = IoQueue::new();
        q.init();
        q.putchar(b'x');
        assert_eq!(q.len(), 1);
        assert_eq!(q.getchar(), b'x');
        assert!(q.is_empty());
    }

    #[test_case]
    fn fifo_order_is_preserved() {
        let q = IoQueue::new();
        q.init();
        for byte in b"abc" {
            q.putchar(*byte);
        }
        assert_eq!(q.getchar(), b'a');
        assert_eq!(q.getchar(), b'b');
        assert_eq!(q.getchar(), b'c');
    }
}
