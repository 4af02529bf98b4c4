//! Ready/all lists, the context switch, and the block/unblock/yield API
//! (C5).
//!
//! Grounded on `examples/original_source/thread/thread.c`'s
//! `schedule`/`thread_block`/`thread_unblock`/`thread_yield`/`switch_to`.
//! Every entry point here runs with interrupts disabled by its caller,
//! except [`thread_block`]/[`thread_yield`], which take care of that
//! themselves (mirroring the reference's `ASSERT(intr_get_level() ==
//! INTR_OFF)` discipline inside `schedule` itself).

use core::arch::global_asm;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::{DEFAULT_THREAD_PRIORITY, IDLE_THREAD_PRIORITY, PAGE_SIZE};
use crate::elem2entry;
use crate::interrupt::IntrStatus;
use crate::list::List;

use super::pcb::{self, Pcb, Status, ThreadFunc};

static READY_LIST: Mutex<List> = Mutex::new(List::new());
static ALL_LIST: Mutex<List> = Mutex::new(List::new());

/// Address of the idle thread's PCB, set once by [`init`]. Never freed.
static IDLE_PCB: AtomicUsize = AtomicUsize::new(0);

fn idle_pcb() -> *mut Pcb {
    IDLE_PCB.load(Ordering::SeqCst) as *mut Pcb
}

/// Claim the page-aligned stack the CPU is already executing on as the
/// "main" kernel thread's PCB, start the idle thread, and wire up the
/// ready/all lists.
///
/// # Safety
/// Must be called exactly once, early in `kernel_main`, with the CPU
/// currently executing somewhere inside a single page-aligned boot stack
/// (see `config::BOOT_STACK_SIZE`) that nothing else will reuse.
pub unsafe fn init() -> *mut Pcb {
    READY_LIST.lock().init();
    ALL_LIST.lock().init();

    let main = super::current();
    // SAFETY: caller guarantees `main`'s page is this thread's own,
    // untouched boot stack.
    unsafe {
        pcb::init_thread(main, "main", DEFAULT_THREAD_PRIORITY);
        (*main).status = Status::Running;
        ALL_LIST.lock().append(core::ptr::addr_of_mut!((*main).all_list_tag));
    }

    spawn_idle();
    main
}

fn spawn_idle() {
    let idle = thread_start("idle", IDLE_THREAD_PRIORITY, idle_main, 0);
    IDLE_PCB.store(idle as usize, Ordering::SeqCst);
}

extern "C" fn idle_main(_arg: usize) -> ! {
    loop {
        thread_block(Status::Blocked);
        // SAFETY: re-enabling interrupts and halting until the next one
        // arrives is always safe from ring 0; `schedule` only ever resumes
        // this thread with interrupts off.
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}

/// Allocate a fresh kernel stack, initialize a PCB at its base, and enqueue
/// it so it runs the next time the scheduler reaches it.
pub fn thread_start(name: &str, priority: u8, function: ThreadFunc, arg: usize) -> *mut Pcb {
    let page = crate::memory::get_kernel_pages(1).expect("out of kernel pages for a new thread");
    let pcb_ptr = page as *mut Pcb;
    // SAFETY: `page` is a freshly allocated, zeroed, exclusively owned page.
    unsafe {
        pcb::init_thread(pcb_ptr, name, priority);
        pcb::thread_create(pcb_ptr, function, arg);
    }
    // SAFETY: `pcb_ptr`'s tags were just zeroed by `init_thread` above.
    unsafe { enqueue_new_task(pcb_ptr) };
    pcb_ptr
}

/// Append a freshly built PCB (already past `init_thread`/`thread_create`)
/// to the ready and all lists so it runs the next time the scheduler
/// reaches it. Shared by [`thread_start`] and
/// `userspace::process::process_execute`, which builds its PCB's user
/// page directory and vaddr bitmap before the thread is ready to enqueue.
///
/// # Safety
/// `pcb` must be a live PCB whose `general_tag`/`all_list_tag` are still
/// detached (true right after `init_thread` zeroes them).
pub unsafe fn enqueue_new_task(pcb: *mut Pcb) {
    let old = crate::interrupt::disable();
    // SAFETY: caller contract.
    unsafe {
        READY_LIST.lock().append(core::ptr::addr_of_mut!((*pcb).general_tag));
        ALL_LIST.lock().append(core::ptr::addr_of_mut!((*pcb).all_list_tag));
    }
    crate::interrupt::set_status(old);
}

/// Visit every live task (kernel thread or process) linked into the
/// all-tasks list, in list order, without removing anything. Holds
/// interrupts disabled for the whole traversal, same as every other
/// `ALL_LIST` touch.
///
/// Used by the `ps` syscall to report each task's pid/name/status.
pub fn for_each_task<F: FnMut(u32, &str, Status)>(mut f: F) {
    let old = crate::interrupt::disable();
    ALL_LIST.lock().find_first(|elem| {
        let pcb = elem2entry!(Pcb, all_list_tag, elem);
        // SAFETY: every node linked into `ALL_LIST` is a live `Pcb`'s
        // `all_list_tag`.
        unsafe {
            let raw = &(*pcb).name;
            let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let name = core::str::from_utf8(&raw[..len]).unwrap_or("");
            f((*pcb).pid, name, (*pcb).status);
        }
        false
    });
    crate::interrupt::set_status(old);
}

/// Load `next`'s page directory (if it has one of its own) and point the
/// TSS's ring-0 stack at the top of its kernel stack, so the next interrupt
/// taken from ring 3 lands correctly.
fn process_activate(next: *mut Pcb) {
    // SAFETY: `next` is a live PCB handed to us by `schedule`.
    let pgdir = unsafe { (*next).pgdir };
    if pgdir != 0 {
        let phys = crate::memory::addr_v2p(pgdir);
        // SAFETY: `phys` is the physical address of `next`'s own page
        // directory, built by `userspace::process::create_page_dir` with the
        // kernel's high half and the recursive self-map already installed.
        unsafe {
            core::arch::asm!("mov cr3, {0}", in(reg) phys, options(nostack, preserves_flags));
        }
    }
    let esp0 = (next as usize) + PAGE_SIZE;
    crate::gdt::set_kernel_stack(esp0 as u32);
}

/// Pick the next task to run and switch to it.
///
/// # Preconditions
/// Interrupts must already be disabled; this only ever runs at the tail of
/// [`thread_block`]/[`thread_yield`] or from the timer IRQ handler, all of
/// which already hold that invariant.
pub fn schedule() {
    debug_assert_eq!(
        crate::interrupt::get_status(),
        IntrStatus::Off,
        "schedule: interrupts must be disabled",
    );

    let cur = super::current();
    // SAFETY: `cur` is the live current PCB.
    unsafe {
        if (*cur).status == Status::Running {
            (*cur).status = Status::Ready;
            (*cur).ticks = (*cur).priority;
            READY_LIST.lock().append(core::ptr::addr_of_mut!((*cur).general_tag));
        }
    }

    if READY_LIST.lock().is_empty() {
        // SAFETY: `idle_pcb()` was set once by `init` and is never freed;
        // it is always in some blocked-class status whenever the ready
        // list is otherwise empty (it immediately re-blocks itself).
        unsafe { thread_unblock(idle_pcb()) };
    }

    let next_elem = READY_LIST
        .lock()
        .pop()
        .expect("ready list must be non-empty: idle was just unblocked if needed");
    let next = elem2entry!(Pcb, general_tag, next_elem);

    // SAFETY: `next` just came off the ready list, so it is a live PCB not
    // currently running anywhere else.
    unsafe { (*next).status = Status::Running };
    process_activate(next);

    // `cur`/`next` are both live PCBs with one-page kernel stacks; `cur` is
    // the thread actually executing this call (required by `switch_to`,
    // declared `safe` since it never violates that on its own).
    switch_to(cur, next);
}

/// Suspend the current thread in `status` and run the next ready one.
///
/// # Panics
/// Panics (via `debug_assert!`) if `status` is not one of the blocked-class
/// statuses — a `Running`/`Ready` thread has no business calling this.
pub fn thread_block(status: Status) {
    debug_assert!(
        matches!(status, Status::Blocked | Status::Waiting | Status::Hanging),
        "thread_block: status must be a blocked-class status",
    );
    let old = crate::interrupt::disable();
    let cur = super::current();
    // SAFETY: `cur` is the live current PCB.
    unsafe { (*cur).status = status };
    schedule();
    crate::interrupt::set_status(old);
}

/// Move `pcb` from a blocked-class status to the front of the ready list.
///
/// Prepending (rather than appending) gives a just-woken I/O waiter
/// priority over threads that were merely time-sliced, matching the
/// reference's deliberate latency choice.
///
/// # Safety
/// `pcb` must be a live PCB currently in a blocked-class status and not
/// already linked into the ready list.
pub unsafe fn thread_unblock(pcb: *mut Pcb) {
    let old = crate::interrupt::disable();
    // SAFETY: caller contract.
    unsafe {
        debug_assert!(
            matches!((*pcb).status, Status::Blocked | Status::Waiting | Status::Hanging),
            "thread_unblock: target must be in a blocked-class status",
        );
        READY_LIST.lock().push(core::ptr::addr_of_mut!((*pcb).general_tag));
        (*pcb).status = Status::Ready;
    }
    crate::interrupt::set_status(old);
}

/// Give up the remainder of the current time slice without blocking.
pub fn thread_yield() {
    let old = crate::interrupt::disable();
    let cur = super::current();
    // SAFETY: `cur` is the live current PCB.
    unsafe {
        (*cur).status = Status::Ready;
        READY_LIST.lock().append(core::ptr::addr_of_mut!((*cur).general_tag));
    }
    schedule();
    crate::interrupt::set_status(old);
}

global_asm!(
    r#"
.intel_syntax noprefix
.section .text

.global switch_to
switch_to:
    push esi
    push edi
    push ebx
    push ebp
    mov eax, [esp + 20]
    mov [eax], esp
    mov eax, [esp + 24]
    mov esp, [eax]
    pop ebp
    pop ebx
    pop edi
    pop esi
    ret
"#
);

unsafe extern "C" {
    /// Save `cur`'s callee-saved registers onto its own stack, stash the
    /// resulting `esp` in `cur->self_kstack`, then load `esp` from
    /// `next->self_kstack` and pop its callee-saved registers back — the
    /// other half of whichever `switch_to` (or `thread_create`'s fabricated
    /// frame) last ran on `next`.
    ///
    /// # Safety
    /// Both `cur` and `next` must be live PCBs with a one-page kernel
    /// stack reachable through `self_kstack`, and `cur` must be the PCB of
    /// the thread making this call.
    safe fn switch_to(cur: *mut Pcb, next: *mut Pcb);
}

#[cfg(test)]
mod tests {
    #[test_case]
    fn idle_priority_is_lowest_of_the_fixed_priorities() {
        assert!(crate::config::IDLE_THREAD_PRIORITY < crate::config::DEFAULT_THREAD_PRIORITY);
    }
}
