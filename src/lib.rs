//! A small preemptive multitasking kernel for 32-bit protected-mode x86.
//!
//! This is a learning project: a from-scratch reimplementation of a
//! Pintos-style teaching kernel (GDT/TSS, IDT, PIT-driven round-robin
//! scheduling, a recursively self-mapped paging scheme, an arena heap, an
//! ATA/IDE block driver, and ring-3 processes serviced through a fixed
//! `int 0x80` syscall table) built up module by module. `boot` is the one
//! piece every binary linked against this library shares unconditionally;
//! everything else is reusable infrastructure the kernel proper
//! (`entry_point.rs`) and the `tests/` integration suite both assemble for
//! themselves.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

pub mod bitmap;
pub mod boot;
pub mod config;
pub mod error;
pub mod gdt;
pub mod ide;
pub mod interrupt;
pub mod list;
pub mod memory;
pub mod port;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod timer;
pub mod userspace;
pub mod vga_buffer;

const QEMU_EXIT_PORT: u16 = 0xf4;

/// Bring up every subsystem in the order each one's `init` depends on:
/// segmentation before interrupts (the IDT's gates name a GDT selector),
/// interrupts before the timer/IDE/syscall table (they all register
/// handlers), the memory manager before the scheduler (`scheduler::init`
/// claims the boot stack as a PCB, which lives in ordinary mapped memory).
/// Called once, by each binary's `kernel_entry`, right after `boot`
/// enables paging.
pub fn kernel_init() {
    gdt::init();
    interrupt::init();
    memory::init(config::ASSUMED_TOTAL_MEM_BYTES);
    // SAFETY: called exactly once, before any other code touches the
    // scheduler's ready/all lists, on the same boot stack `_start` has
    // been running on since entry.
    unsafe {
        sched::scheduler::init();
    }
    timer::init(config::PIT_FREQUENCY_HZ);
    userspace::syscall::init();
    ide::init(2);
}

/// Test entry point for `cargo test --lib`.
///
/// Runs the same bring-up as [`kernel_init`] (the unit tests under
/// `#[cfg(test)]` exercise real paging, the heap, and the scheduler), then
/// the custom test harness.
#[cfg(test)]
#[unsafe(no_mangle)]
pub extern "C" fn kernel_entry() -> ! {
    kernel_init();
    interrupt::enable();
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// Define possible exit code for qemu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Define a successfull exit status
    Success = 0x10,
    /// Define a failure exit status
    Failure = 0x11,
}

/// Exit qemu with a specific exit code.
/// Connect to an IO Port to exit qemu.
/// Configuration for the exit port is in the config.toml file.
pub fn exit_qemu(exit_code: QemuExitCode) {
    // SAFETY: `QEMU_EXIT_PORT` is the `isa-debug-exit` device configured in
    // `Cargo.toml`'s `[package.metadata.bootimage]` (`iosize=0x04`);
    // writing to it has no effect outside QEMU.
    unsafe {
        port::outl(QEMU_EXIT_PORT, exit_code as u32);
    }
}

/// Panic handler for external (functional) tests.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop if a test panics. It should not be possible as we exit_qemu before."
    )]
    loop {}
}

/// Custom test runner for `no_std` testing.
pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for unit tests.
#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);
    loop {}
}

/// Trait to generalize tests cases.
/// Encapsulate the prints
pub trait Testable {
    /// Function that encapsulate the test run function.
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        use core::any::type_name;

        serial_print!("{}...\t", type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}
