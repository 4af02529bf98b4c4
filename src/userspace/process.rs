//! Process creation and the first ring-0→ring-3 transition (C9).
//!
//! Grounded on `examples/original_source/userprog/process.c`'s
//! `process_execute`/`start_process`/`create_page_dir`/`process_activate`.
//! `process_activate` itself already lives in
//! [`crate::sched::scheduler`] — every schedule loads whichever PCB comes
//! next, process or kernel thread alike, so there is no separate process-only
//! copy of that logic here.

use crate::config::{
    DEFAULT_THREAD_PRIORITY, KERNEL_PDE_START, PAGE_SIZE, RECURSIVE_PDE_INDEX, USER_STACK3_VADDR,
    USER_VADDR_START,
};
use crate::memory::paging::{self, PG_PRESENT, PG_RW};
use crate::memory::PoolFlags;
use crate::sched::pcb::{self, IntrStack, Pcb, Status};
use crate::sched::scheduler;

const USER_VADDR_RANGE_BYTES: usize = USER_STACK3_VADDR - USER_VADDR_START;
const USER_VADDR_BITMAP_BYTES: usize = USER_VADDR_RANGE_BYTES / (PAGE_SIZE * 8);
const USER_VADDR_BITMAP_PAGES: usize = USER_VADDR_BITMAP_BYTES.div_ceil(PAGE_SIZE);

/// Allocate a page directory, copy the kernel's shared high half into it,
/// and install its own recursive self-map. Returns the new directory's
/// kernel vaddr (what `Pcb::pgdir` stores).
fn create_page_dir() -> usize {
    let pgdir_vaddr =
        crate::memory::get_kernel_pages(1).expect("out of kernel pages for a new page directory");
    let new_pdes = pgdir_vaddr as *mut u32;
    let master_pdes = paging::self_map_ptr();

    // SAFETY: `new_pdes` is a freshly allocated, zeroed, exclusively owned
    // page; `master_pdes` is the live kernel page directory's own PDE array,
    // reached through its recursive self-map, valid to read.
    unsafe {
        for i in KERNEL_PDE_START..1024 {
            *new_pdes.add(i) = *master_pdes.add(i);
        }
    }

    let pgdir_phys = crate::memory::addr_v2p(pgdir_vaddr);
    // SAFETY: `pgdir_phys` is this directory's own physical frame; entry
    // `RECURSIVE_PDE_INDEX` is this directory's self-map slot.
    unsafe {
        *new_pdes.add(RECURSIVE_PDE_INDEX) = u32::try_from(pgdir_phys).expect("physical address exceeds 32 bits") | (PG_PRESENT | PG_RW) as u32;
    }

    pgdir_vaddr
}

/// Allocate a PCB, a private page directory, and a user virtual-address
/// bitmap for a brand-new process that will start executing at `entry`.
/// Enqueues the PCB so the scheduler runs it like any other task.
pub fn process_execute(entry: extern "C" fn() -> !, name: &str) -> *mut Pcb {
    let page =
        crate::memory::get_kernel_pages(1).expect("out of kernel pages for a new process PCB");
    let pcb_ptr = page as *mut Pcb;

    // SAFETY: `page` is a freshly allocated, zeroed, exclusively owned page.
    unsafe { pcb::init_thread(pcb_ptr, name, DEFAULT_THREAD_PRIORITY) };

    let bitmap_storage = crate::memory::get_kernel_pages(USER_VADDR_BITMAP_PAGES)
        .expect("out of kernel pages for a process's user-vaddr bitmap");
    // SAFETY: `bitmap_storage` is a freshly allocated range owned solely by
    // this PCB from here on; `USER_VADDR_BITMAP_BYTES` covers exactly
    // `[USER_VADDR_START, USER_STACK3_VADDR)` at page granularity.
    let mut bitmap = unsafe {
        crate::bitmap::Bitmap::from_raw_parts(bitmap_storage as *mut u8, USER_VADDR_BITMAP_BYTES)
    };
    bitmap.init();

    let pgdir = create_page_dir();

    // SAFETY: `pcb_ptr` was just initialized by `init_thread` above and is
    // not yet visible to the scheduler.
    unsafe {
        (*pcb_ptr).userprog_vaddr = Some(bitmap);
        (*pcb_ptr).pgdir = pgdir;
        pcb::thread_create(pcb_ptr, start_process, entry as usize);
        scheduler::enqueue_new_task(pcb_ptr);
    }

    pcb_ptr
}

/// Trampoline every brand-new process's first context switch lands in:
/// fabricates a ring-3 `intr_stack` on the current (still ring-0) kernel
/// stack and falls into the shared `intr_exit` stub to `iret` into it.
///
/// # Panics
/// Asserts the fabricated user stack page can be allocated; a process that
/// cannot get its single stack page has no way to run at all.
extern "C" fn start_process(entry: usize) -> ! {
    let entry_point: extern "C" fn() -> ! =
        // SAFETY: `entry` was stored by `process_execute` from a real
        // function pointer of this signature.
        unsafe { core::mem::transmute::<usize, extern "C" fn() -> !>(entry) };

    let user_stack_vaddr = crate::memory::get_a_page(PoolFlags::User, USER_STACK3_VADDR)
        .expect("out of physical memory for a process's user stack page");
    let user_esp = user_stack_vaddr + PAGE_SIZE;

    let cur = crate::sched::current();
    // SAFETY: `cur` is the live current PCB (this process, mid-creation);
    // its kernel stack has just started running `start_process` and has
    // room below the current `esp` for one `IntrStack`.
    unsafe {
        (*cur).status = Status::Running;

        let frame_addr = (*cur).self_kstack - core::mem::size_of::<IntrStack>();
        (*cur).self_kstack = frame_addr;
        let frame = frame_addr as *mut IntrStack;

        core::ptr::write_bytes(frame, 0, 1);
        (*frame).cs = u32::from(crate::gdt::USER_CODE_SELECTOR);
        (*frame).ds = u32::from(crate::gdt::USER_DATA_SELECTOR);
        (*frame).es = u32::from(crate::gdt::USER_DATA_SELECTOR);
        (*frame).fs = u32::from(crate::gdt::USER_DATA_SELECTOR);
        (*frame).gs = u32::from(crate::gdt::USER_DATA_SELECTOR);
        (*frame).ss = u32::from(crate::gdt::USER_DATA_SELECTOR);
        (*frame).eip = entry_point as usize as u32;
        (*frame).esp = user_esp as u32;
        // IOPL 0, reserved bit 1 (MBS) always set, IF set so the user
        // process runs preemptibly.
        (*frame).eflags = 0x200 | 0x2;
    }

    // SAFETY: this is exactly the frame layout `intr_exit` unwinds, whether
    // it arrived via a hardware interrupt or, as here, was fabricated by
    // software. `intr_exit` starts with `popad`, which expects `esp` at the
    // frame's `edi` field, not at `vec_no` — the same `add esp, 4` the
    // common stub performs after `call rust_interrupt_dispatch` (see
    // `interrupt::stubs`) to skip the vector number it pushed.
    unsafe {
        core::arch::asm!(
            "mov esp, {0}",
            "jmp {1}",
            in(reg) (*cur).self_kstack + core::mem::size_of::<u32>(),
            sym crate::interrupt::intr_exit,
            options(noreturn),
        );
    }
}
