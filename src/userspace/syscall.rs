//! Fixed 32-slot syscall dispatch table (C10).
//!
//! Grounded on `examples/original_source/userprog/syscall-init.c`. User code
//! traps via `int 0x80`, landing on the same stub/`rust_interrupt_dispatch`
//! path as every hardware interrupt; the syscall number and up to three
//! arguments are read straight out of the already-built [`IntrStack`]
//! instead of a hand-rolled register-marshalling convention, since that
//! frame already holds every general-purpose register the trap saved.

extern crate alloc;

use alloc::string::String;

use crate::config::SYSCALL_TABLE_SIZE;
use crate::error::KernelError;
use crate::sched::pcb::IntrStack;

pub const SYS_GETPID: u32 = 0;
pub const SYS_WRITE: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_PUTCHAR: u32 = 3;
pub const SYS_CLEAR: u32 = 4;
pub const SYS_MALLOC: u32 = 5;
pub const SYS_FREE: u32 = 6;
pub const SYS_FORK: u32 = 7;
pub const SYS_GETCWD: u32 = 8;
pub const SYS_OPEN: u32 = 9;
pub const SYS_CLOSE: u32 = 10;
pub const SYS_LSEEK: u32 = 11;
pub const SYS_UNLINK: u32 = 12;
pub const SYS_MKDIR: u32 = 13;
pub const SYS_OPENDIR: u32 = 14;
pub const SYS_CLOSEDIR: u32 = 15;
pub const SYS_CHDIR: u32 = 16;
pub const SYS_RMDIR: u32 = 17;
pub const SYS_READDIR: u32 = 18;
pub const SYS_REWINDDIR: u32 = 19;
pub const SYS_STAT: u32 = 20;
pub const SYS_PS: u32 = 21;
pub const SYS_EXECV: u32 = 22;

/// A syscall's return value, placed back into the trap frame's `eax` on
/// return to user mode. `Ok` carries whatever the handler itself produced
/// (byte counts, a pid, a malloc'd address); `Err` carries the negated
/// `errno`-style encoding a user-space libc would expect.
pub type SyscallResult = Result<i32, KernelError>;

type Handler = fn(&IntrStack) -> SyscallResult;

/// One slot per syscall number; `None` is "unimplemented", same as every
/// slot past [`SYS_EXECV`] up to [`SYSCALL_TABLE_SIZE`].
static TABLE: [Option<Handler>; SYSCALL_TABLE_SIZE] = build_table();

const fn build_table() -> [Option<Handler>; SYSCALL_TABLE_SIZE] {
    let mut table: [Option<Handler>; SYSCALL_TABLE_SIZE] = [None; SYSCALL_TABLE_SIZE];
    table[SYS_GETPID as usize] = Some(sys_getpid);
    table[SYS_WRITE as usize] = Some(sys_write);
    table[SYS_READ as usize] = Some(sys_read);
    table[SYS_PUTCHAR as usize] = Some(sys_putchar);
    table[SYS_CLEAR as usize] = Some(sys_clear);
    table[SYS_MALLOC as usize] = Some(sys_malloc);
    table[SYS_FREE as usize] = Some(sys_free);
    table[SYS_FORK as usize] = Some(sys_fork);
    table[SYS_GETCWD as usize] = Some(sys_getcwd);
    table[SYS_OPEN as usize] = Some(sys_open);
    table[SYS_CLOSE as usize] = Some(sys_close);
    table[SYS_LSEEK as usize] = Some(sys_lseek);
    table[SYS_UNLINK as usize] = Some(sys_unlink);
    table[SYS_MKDIR as usize] = Some(sys_mkdir);
    table[SYS_OPENDIR as usize] = Some(sys_opendir);
    table[SYS_CLOSEDIR as usize] = Some(sys_closedir);
    table[SYS_CHDIR as usize] = Some(sys_chdir);
    table[SYS_RMDIR as usize] = Some(sys_rmdir);
    table[SYS_READDIR as usize] = Some(sys_readdir);
    table[SYS_REWINDDIR as usize] = Some(sys_rewinddir);
    table[SYS_STAT as usize] = Some(sys_stat);
    table[SYS_PS as usize] = Some(sys_ps);
    table[SYS_EXECV as usize] = Some(sys_execv);
    table
}

/// Register the `int 0x80` handler. Must run once, before interrupts are
/// first enabled.
pub fn init() {
    crate::interrupt::register_handler(crate::interrupt::VECTOR_SYSCALL, dispatch_from_trap);
}

/// Entry point [`crate::interrupt`] calls for vector `0x80`. Reads the
/// syscall number and arguments out of the trap frame recovered from the
/// current task's kernel stack, dispatches, and writes the result back into
/// the frame's `eax` so it reaches user space on `iretd`.
fn dispatch_from_trap(_vec_no: u32) {
    let cur = crate::sched::current();
    // SAFETY: `cur` is the live current PCB; a syscall is only ever taken
    // from a ring-3 task, so the trap frame the common stub just pushed
    // sits directly below `self_kstack`'s resting place before this call.
    let frame = unsafe { &mut *((*cur).self_kstack as *mut IntrStack) };

    let result = dispatch(frame.eax, frame);
    frame.eax = match result {
        Ok(value) => value as u32,
        Err(_err) => u32::MAX,
    };
}

fn dispatch(num: u32, frame: &IntrStack) -> SyscallResult {
    match TABLE.get(num as usize).copied().flatten() {
        Some(handler) => handler(frame),
        None => Err(KernelError::NotSupported("unknown syscall number")),
    }
}

fn sys_getpid(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    let cur = crate::sched::current();
    // SAFETY: `cur` is the live current PCB.
    Ok(unsafe { (*cur).pid } as i32)
}

/// Validate that `[ptr, ptr + len)` lies inside this task's own user
/// address range, the one boundary check every buffer-taking syscall needs
/// before it may safely read/write through a user-supplied pointer.
fn validate_user_buffer(ptr: u32, len: u32) -> Result<(), KernelError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(KernelError::NotSupported("buffer length overflow"))?;
    if start < crate::config::USER_VADDR_START || end > crate::config::USER_STACK3_VADDR {
        return Err(KernelError::NotSupported("buffer outside user address range"));
    }
    Ok(())
}

fn sys_write(frame: &IntrStack) -> SyscallResult {
    let fd = frame.ebx as i32;
    let buf_ptr = frame.ecx;
    let len = frame.edx;

    if fd != 1 && fd != 2 {
        return Err(KernelError::InvalidFd);
    }
    validate_user_buffer(buf_ptr, len)?;

    // SAFETY: `validate_user_buffer` confirmed this range lies inside the
    // calling task's own user address space.
    let bytes = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, len as usize) };
    for &byte in bytes {
        crate::vga_buffer::write_byte(byte);
    }
    Ok(i32::try_from(len).unwrap_or(i32::MAX))
}

fn sys_read(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("stdin (no keyboard-backed fd 0 wired up)"))
}

fn sys_putchar(frame: &IntrStack) -> SyscallResult {
    let byte = frame.ebx as u8;
    crate::vga_buffer::write_byte(byte);
    Ok(0)
}

fn sys_clear(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    crate::vga_buffer::clear_screen();
    Ok(0)
}

fn sys_malloc(frame: &IntrStack) -> SyscallResult {
    let size = frame.ebx as usize;
    let cur = crate::sched::current();
    // SAFETY: `cur` is the live current PCB; its `user_heap` draws pages
    // from the user pool this task already owns.
    let ptr = unsafe { (*cur).user_heap.malloc(size) };
    if ptr.is_null() {
        Err(KernelError::OutOfPhysicalMemory)
    } else {
        Ok(ptr as i32)
    }
}

fn sys_free(frame: &IntrStack) -> SyscallResult {
    let ptr = frame.ebx as *mut u8;
    let cur = crate::sched::current();
    // SAFETY: `ptr` is caller-supplied; `free` itself asserts the arena
    // header it recovers looks sane, matching every other heap free path in
    // this kernel.
    unsafe { (*cur).user_heap.free(ptr) };
    Ok(0)
}

fn sys_fork(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("fork"))
}

fn sys_getcwd(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_open(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_close(frame: &IntrStack) -> SyscallResult {
    let fd = frame.ebx as i32;
    if !(0..3).contains(&fd) {
        return Err(KernelError::InvalidFd);
    }
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_lseek(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_unlink(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_mkdir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_opendir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_closedir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_chdir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_rmdir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_readdir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_rewinddir(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

fn sys_stat(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("filesystem"))
}

/// List every live task's pid/name/status, mirroring the reference shell's
/// `ps` built-in. Writes to the console directly rather than returning a
/// buffer: there is no filesystem-backed fd for the caller to read it back
/// from, and this matches `ps`'s behavior as a diagnostic, not a data call.
fn sys_ps(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    let mut line = String::new();
    crate::sched::scheduler::for_each_task(|pid, name, status| {
        line.clear();
        let _ = core::fmt::Write::write_fmt(
            &mut line,
            format_args!("{pid:>5}  {name:<16} {status:?}\n"),
        );
        for byte in line.bytes() {
            crate::vga_buffer::write_byte(byte);
        }
    });
    Ok(0)
}

fn sys_execv(frame: &IntrStack) -> SyscallResult {
    let _ = frame;
    Err(KernelError::NotSupported("execv (no filesystem to load a binary from)"))
}

#[cfg(test)]
mod tests {
    use super::{build_table, SYS_EXECV, SYS_GETPID, SYS_WRITE};

    #[test_case]
    fn every_named_syscall_has_a_table_entry() {
        let table = build_table();
        assert!(table[SYS_GETPID as usize].is_some());
        assert!(table[SYS_WRITE as usize].is_some());
        assert!(table[SYS_EXECV as usize].is_some());
    }

    #[test_case]
    fn slots_past_the_named_range_are_unimplemented() {
        let table = build_table();
        assert!(table[31].is_none());
    }
}
