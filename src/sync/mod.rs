//! Synchronization primitives (C6).
//!
//! Grounded on `examples/original_source/thread/sync.c`/`sync.h` and
//! `device/ioqueue.c`/`ioqueue.h`. Every primitive here assumes a single
//! CPU: the only concurrency to guard against is the timer IRQ (or another
//! device IRQ) preempting a read-modify-write, so each one serializes
//! through [`crate::interrupt::disable`]/[`crate::interrupt::set_status`]
//! rather than a spinlock.

pub mod ioqueue;
pub mod mutex;
pub mod semaphore;

pub use ioqueue::IoQueue;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
