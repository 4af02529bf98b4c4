//! The kernel binary's entry point.
//!
//! `protokernel::boot` owns `_start`/the multiboot header/the paging
//! bootstrap; this file only has to define `kernel_entry`, the symbol
//! `boot_init` jumps to once paging is live, and bring up the one thing
//! that is specific to actually running the OS rather than a test:
//! spawning a user process and falling into the idle loop.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use protokernel::config::DEFAULT_THREAD_PRIORITY;
use protokernel::sched::scheduler;
use protokernel::{println, userspace};

/// Entry point every binary linked against `protokernel` must define; see
/// `protokernel::boot`.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_entry() -> ! {
    protokernel::kernel_init();
    println!("protokernel: paging, scheduling, and devices are up");

    scheduler::thread_start("shell", DEFAULT_THREAD_PRIORITY, shell_main, 0);

    protokernel::interrupt::enable();

    loop {
        // SAFETY: halting until the next interrupt is always safe once
        // interrupts are enabled; the scheduler preempts this thread like
        // any other on the next timer tick.
        unsafe { core::arch::asm!("hlt") };
    }
}

/// Placeholder shell thread: the core design's shell command parser is out
/// of scope (§1 non-goals), but a kernel thread that can itself spawn a
/// user process exercises the full `process_execute`/`int 0x80` path end
/// to end without one.
extern "C" fn shell_main(_arg: usize) -> ! {
    let _pid = userspace::process_execute(user_init, "init");
    loop {
        protokernel::sched::scheduler::thread_yield();
    }
}

/// The first (and, absent `fork`/`execv`, only) user process: a stand-in
/// for whatever binary a real filesystem would load (see
/// `user_programs/hello`). Repeatedly issues `SYS_GETPID` rather than
/// `SYS_WRITE` — its code still lives on the kernel's own supervisor-only
/// pages (see `DESIGN.md`'s note on `create_page_dir`), so it can trap
/// into ring 0 but cannot yet be given a user-mapped `.text` of its own.
extern "C" fn user_init() -> ! {
    loop {
        // SAFETY: `int 0x80` with `eax = SYS_GETPID` is the documented,
        // stable user-mode syscall convention this kernel exposes.
        unsafe {
            core::arch::asm!("int 0x80", in("eax") 0_u32, options(nostack));
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    protokernel::serial_println!("kernel panic: {}", info);
    loop {
        // SAFETY: halting is always safe; a panicked kernel has nothing
        // left it can safely do.
        unsafe { core::arch::asm!("cli", "hlt") };
    }
}
