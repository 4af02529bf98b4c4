//! Process/thread control block (PCB) layout (C5).
//!
//! Grounded on `examples/original_source/thread/thread.h`. A PCB lives at
//! the base of its own kernel stack page: [`super::current`] recovers a
//! pointer to it by masking `esp` down to the page boundary, so every
//! kernel stack this scheduler hands out must be exactly one page and the
//! PCB must be its first bytes.
//!
//! Field order mirrors `task_struct`, with [`super::scheduler::switch_to`]
//! as the other half of the suspend/resume contract this module sets up.

use core::mem::size_of;

use crate::bitmap::Bitmap;
use crate::config::{FD_TABLE_SIZE, PAGE_SIZE, STACK_MAGIC};
use crate::list::ListElem;
use crate::memory::heap::Heap;
use crate::memory::PoolFlags;

pub const TASK_NAME_LEN: usize = 16;

/// A kernel thread's entry point: `extern "C" fn(arg)`, matching the
/// cdecl frame [`thread_create`] fabricates.
pub type ThreadFunc = extern "C" fn(usize) -> !;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Running,
    Ready,
    Blocked,
    Waiting,
    Hanging,
    Dead,
}

/// Register frame the CPU pushes (and `pushad`/segment pushes add) on
/// entry to any interrupt/exception/syscall handler. Used both to read an
/// interrupted context and to fabricate one for a brand-new user process
/// (see `userspace::process::start_process`).
#[repr(C)]
pub struct IntrStack {
    pub vec_no: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

/// Stack frame [`super::scheduler::switch_to`] saves/restores for a kernel
/// thread that is merely suspended (callee-saved regs plus a return
/// address). For a thread that has never run, `eip` instead points at
/// [`kernel_thread_entry`] and the three fields below it fake the cdecl
/// call frame that trampoline expects — see [`thread_create`].
#[repr(C)]
struct ThreadStack {
    ebp: u32,
    ebx: u32,
    edi: u32,
    esi: u32,
    eip: u32,
    /// Never read; `kernel_thread_entry` never returns, but a cdecl call
    /// frame always has a return-address slot.
    unused_retaddr: u32,
    function: u32,
    func_arg: u32,
}

/// One task, running or not. Field order matches
/// `examples/original_source/thread/thread.h`'s `task_struct` except where
/// Rust's richer types let a C union-of-concerns collapse (e.g.
/// `userprog_vaddr` is `None` for a kernel thread instead of a separate
/// "has no user mapping" convention).
#[repr(C)]
pub struct Pcb {
    /// Current kernel-mode stack pointer. First field by construction:
    /// [`super::scheduler::switch_to`] reads/writes it at offset zero.
    pub self_kstack: usize,
    pub pid: u32,
    pub parent_pid: i32,
    pub status: Status,
    pub name: [u8; TASK_NAME_LEN],
    pub priority: u8,
    /// Time-slice ticks remaining; reloaded from `priority` on reschedule.
    pub ticks: u8,
    pub elapsed_ticks: u32,
    /// Virtual address of this task's page directory, or `0` for a kernel
    /// thread sharing the kernel's own address space.
    pub pgdir: usize,
    /// This task's user virtual-address bitmap; `None` for kernel threads.
    pub userprog_vaddr: Option<Bitmap>,
    /// This task's user-space slab heap, mirroring [`crate::memory::heap`]'s
    /// kernel-global one but drawing pages from the user pool.
    pub user_heap: Heap,
    pub fd_table: [i32; FD_TABLE_SIZE],
    pub cwd_inode_nr: i32,
    pub general_tag: ListElem,
    pub all_list_tag: ListElem,
    pub stack_magic: u32,
}

static PID_COUNTER: spin::Mutex<u32> = spin::Mutex::new(0);

fn allocate_pid() -> u32 {
    let mut next = PID_COUNTER.lock();
    *next += 1;
    *next
}

/// Zero and populate a freshly allocated kernel page as a brand-new PCB.
///
/// # Safety
/// `pcb` must point at a whole, exclusively owned page.
pub unsafe fn init_thread(pcb: *mut Pcb, name: &str, priority: u8) {
    // SAFETY: `Option<Bitmap>`'s niche is the (non-null) slice pointer, so
    // an all-zero bit pattern is a valid `None`; every other field is
    // overwritten below before anything reads it.
    unsafe { core::ptr::write_bytes(pcb, 0, 1) };

    // SAFETY: `pcb` is a valid, exclusively owned `Pcb` by the caller's
    // contract; every write below targets one of its fields.
    unsafe {
        let name_bytes = name.as_bytes();
        let copy_len = name_bytes.len().min(TASK_NAME_LEN - 1);
        (*pcb).name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

        (*pcb).pid = allocate_pid();
        (*pcb).parent_pid = -1;
        (*pcb).status = Status::Ready;
        (*pcb).priority = priority;
        (*pcb).ticks = priority;
        (*pcb).pgdir = 0;
        (*pcb).userprog_vaddr = None;
        let heap_ptr = core::ptr::addr_of_mut!((*pcb).user_heap);
        core::ptr::write(heap_ptr, Heap::new(PoolFlags::User));
        (*heap_ptr).init();

        for slot in &mut (*pcb).fd_table {
            *slot = -1;
        }
        (*pcb).fd_table[0] = 0;
        (*pcb).fd_table[1] = 1;
        (*pcb).fd_table[2] = 2;
        (*pcb).cwd_inode_nr = 0;

        (*pcb).general_tag = ListElem::new();
        (*pcb).all_list_tag = ListElem::new();
        (*pcb).stack_magic = STACK_MAGIC;
        (*pcb).self_kstack = (pcb as usize) + PAGE_SIZE;
    }
}

/// Fabricate the initial suspended-thread frame so that the first
/// `switch_to` into this PCB lands in `kernel_thread_entry(function,
/// func_arg)` as if it had been called normally.
///
/// # Safety
/// Must be called exactly once, right after [`init_thread`], before this
/// PCB is ever switched to.
pub unsafe fn thread_create(pcb: *mut Pcb, function: ThreadFunc, func_arg: usize) {
    // SAFETY: `pcb` was just initialized by `init_thread`, so
    // `self_kstack` points at the top of its page and nothing below it is
    // in use yet.
    unsafe {
        (*pcb).self_kstack -= size_of::<super::pcb::IntrStackReservation>();
        (*pcb).self_kstack -= size_of::<ThreadStack>();
        let frame = (*pcb).self_kstack as *mut ThreadStack;
        (*frame).ebp = 0;
        (*frame).ebx = 0;
        (*frame).edi = 0;
        (*frame).esi = 0;
        (*frame).eip = kernel_thread_entry as usize as u32;
        (*frame).unused_retaddr = 0;
        (*frame).function = function as usize as u32;
        (*frame).func_arg = func_arg as u32;
    }
}

/// Reserves room for an `IntrStack` below a fresh thread's `ThreadStack`,
/// the same way the reference leaves the top of a new kernel stack free
/// for whatever interrupt frame eventually lands there.
pub(super) struct IntrStackReservation(IntrStack);

/// Lands every brand-new kernel thread's first `ret` from `switch_to`;
/// enables interrupts (a thread always starts with them off, mirroring
/// the invariant that `schedule()` runs with interrupts disabled) then
/// calls into the real entry point.
extern "C" fn kernel_thread_entry(function: usize, func_arg: usize) -> ! {
    crate::interrupt::enable();
    // SAFETY: `function` was stored by `thread_create` from a real
    // `ThreadFunc`.
    let function: ThreadFunc = unsafe { core::mem::transmute::<usize, ThreadFunc>(function) };
    function(func_arg)
}

#[cfg(test)]
mod tests {
    use super::{IntrStack, ThreadStack};

    #[test_case]
    fn thread_stack_is_smaller_than_a_page() {
        assert!(core::mem::size_of::<ThreadStack>() + core::mem::size_of::<IntrStack>() < crate::config::PAGE_SIZE);
    }
}
