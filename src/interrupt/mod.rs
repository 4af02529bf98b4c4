//! Interrupt descriptor table, dispatch, and the critical-section API (C3).
//!
//! Grounded on `examples/original_source/kernel/interrupt.c`/`interrupt.h`.
//! The IDT itself is data (48 hardware/exception gates plus the syscall
//! gate at 0x80, each pointing at its own stub in [`stubs`]); the actual
//! push/pop/`iretd` mechanics live there. This
//! module owns the registered-handler table, the exception banner shown for
//! unhandled CPU faults, and `enable`/`disable`/`set_status`, the save-IF
//! pattern every lock in [`crate::sync`] and the scheduler's list splices
//! build on.

mod pic;
mod stubs;

pub use stubs::intr_exit;

use core::arch::asm;
use core::mem::size_of;

use spin::Mutex;

use crate::config::{ATA_PRIMARY_VECTOR, ATA_SECONDARY_VECTOR, PIC1_VECTOR_OFFSET, PIC2_VECTOR_OFFSET};
use crate::gdt::KERNEL_CODE_SELECTOR;

/// Number of IDT gates: the 48 architectural/hardware vectors (0x00-0x2F)
/// plus the software-interrupt syscall gate at 0x80. Vectors in between are
/// left as empty (not-present) gates — nothing ever targets them.
const IDT_DESC_CNT: usize = VECTOR_SYSCALL as usize + 1;

/// IRQ0, the PIT tick, per §4.7.
pub const VECTOR_TIMER: u8 = PIC1_VECTOR_OFFSET;
/// IRQ1, the keyboard controller.
pub const VECTOR_KEYBOARD: u8 = PIC1_VECTOR_OFFSET + 1;
/// IRQ14, the primary ATA channel.
pub const VECTOR_ATA_PRIMARY: u8 = ATA_PRIMARY_VECTOR;
/// IRQ15, the secondary ATA channel.
pub const VECTOR_ATA_SECONDARY: u8 = ATA_SECONDARY_VECTOR;
/// Software-interrupt vector used for the syscall table (C10).
pub const VECTOR_SYSCALL: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GateDesc {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl GateDesc {
    const fn empty() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn interrupt_gate(handler: usize) -> Self {
        // Present, DPL=3 (0xEE): user code issues `int 0x80` directly for
        // the syscall gate; every other vector only ever arrives from
        // hardware or a CPU fault, so the looser DPL is harmless there too.
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attr: 0xEE,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static IDT: Mutex<[GateDesc; IDT_DESC_CNT]> = Mutex::new([GateDesc::empty(); IDT_DESC_CNT]);

/// Registered handler table, indexed by vector number. `None` means
/// "unhandled": exceptions print the banner and hang, IRQs just get EOI'd.
static HANDLERS: Mutex<[Option<fn(u32)>; IDT_DESC_CNT]> = Mutex::new([None; IDT_DESC_CNT]);

const EXCEPTION_NAMES: [&str; 0x14] = [
    "#DE Divide Error",
    "#DB Debug Exception",
    "NMI Interrupt",
    "#BP Breakpoint Exception",
    "#OF Overflow Exception",
    "#BR BOUND Range Exceeded Exception",
    "#UD Invalid Opcode Exception",
    "#NM Device Not Available Exception",
    "#DF Double Fault Exception",
    "Coprocessor Segment Overrun",
    "#TS Invalid TSS Exception",
    "#NP Segment Not Present",
    "#SS Stack Fault Exception",
    "#GP General Protection Exception",
    "#PF Page-Fault Exception",
    "Reserved Exception",
    "#MF x87 FPU Floating-Point Error",
    "#AC Alignment Check Exception",
    "#MC Machine-Check Exception",
    "#XF SIMD Floating-Point Exception",
];

/// Build and load the IDT, remap the PICs, and install the default
/// handlers for the timer and spurious IRQ7/IRQ15. Must run once, before
/// the first `sti`.
pub fn init() {
    {
        let mut idt = IDT.lock();
        for (vec_no, stub) in stubs::STUB_TABLE.iter().enumerate() {
            idt[vec_no] = GateDesc::interrupt_gate(*stub as usize);
        }
        idt[VECTOR_SYSCALL as usize] = GateDesc::interrupt_gate(stubs::intr_vector_syscall as usize);

        let pointer = IdtPointer {
            limit: (size_of::<[GateDesc; IDT_DESC_CNT]>() - 1) as u16,
            base: idt.as_ptr() as u32,
        };
        // SAFETY: `pointer` describes the table just built above.
        unsafe {
            asm!("lidt [{0}]", in(reg) &pointer);
        }
    }

    pic::remap();

    register_handler(0x27, spurious_irq);
    register_handler(0x2F, spurious_irq);
}

fn spurious_irq(_vec_no: u32) {}

/// Install `handler` for `vec_no`, replacing whatever was registered
/// before. Does not touch the PIC mask; callers unmask their own IRQ line
/// once they are ready to receive it (see [`pic::unmask`]).
///
/// Silently does nothing for a `vec_no` with no IDT gate (there is no
/// handler slot to fill and nothing will ever dispatch to it).
pub fn register_handler(vec_no: u8, handler: fn(u32)) {
    if let Some(slot) = HANDLERS.lock().get_mut(vec_no as usize) {
        *slot = Some(handler);
    }
}

/// Unmask IRQ line `irq` (0-15) at the PIC.
pub fn enable_irq(irq: u8) {
    pic::unmask(irq);
}

/// Entry point called by every [`stubs`] stub with the vector number it was
/// compiled for. Exceptions without a registered handler print a banner and
/// hang with interrupts disabled, matching `general_intr_handler`'s fatal
/// path; IRQs without a registered handler are silently EOI'd.
#[unsafe(no_mangle)]
extern "C" fn rust_interrupt_dispatch(vec_no: u32) {
    // EOI before the handler runs, not after: the timer handler's `handler`
    // call below may `schedule()` into `switch_to` and never return here
    // until this task is rescheduled, potentially much later (or never, for
    // a CPU-bound thread). Sending EOI first guarantees the triggering IRQ
    // is always acknowledged to the PIC before any such context switch, so
    // further interrupts on that line keep arriving.
    if (u32::from(PIC1_VECTOR_OFFSET)..u32::from(PIC2_VECTOR_OFFSET) + 8).contains(&vec_no) {
        pic::send_eoi(vec_no as u8);
    }

    let handler = HANDLERS.lock().get(vec_no as usize).copied().flatten();
    match handler {
        Some(handler) => handler(vec_no),
        None if vec_no < 0x20 => fatal_exception(vec_no),
        None => {}
    }
}

fn fatal_exception(vec_no: u32) -> ! {
    let name = EXCEPTION_NAMES
        .get(vec_no as usize)
        .copied()
        .unwrap_or("Unknown Exception");
    let cr2 = if vec_no == 14 {
        // SAFETY: reading CR2 has no side effect.
        Some(unsafe { read_cr2() })
    } else {
        None
    };
    crate::serial_println!("!!!!!!! {} !!!!!!!", name);
    if let Some(addr) = cr2 {
        crate::serial_println!("fault address: {:#010x}", addr);
    }
    loop {
        // SAFETY: halting with interrupts already off via the caller's
        // `cli`-on-entry convention for fatal paths.
        unsafe { asm!("hlt") };
    }
}

unsafe fn read_cr2() -> u32 {
    let value: u32;
    // SAFETY: CR2 is always readable from ring 0.
    unsafe { asm!("mov {0}, cr2", out(reg) value) };
    value
}

/// Snapshot of whether interrupts were enabled, returned by [`disable`] so
/// the caller can restore the prior state with [`set_status`] instead of
/// unconditionally re-enabling (which would wrongly turn interrupts back on
/// inside a nested critical section).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntrStatus {
    On,
    Off,
}

/// Current interrupt-enable status, read from `EFLAGS.IF`.
pub fn get_status() -> IntrStatus {
    let eflags: u32;
    // SAFETY: `pushfd`/`pop` reads EFLAGS without side effects.
    unsafe {
        asm!("pushfd", "pop {0}", out(reg) eflags);
    }
    if eflags & (1 << 9) != 0 {
        IntrStatus::On
    } else {
        IntrStatus::Off
    }
}

/// Enable interrupts (`sti`), returning the previous status.
pub fn enable() -> IntrStatus {
    let prev = get_status();
    // SAFETY: `sti` is always safe to issue from ring 0.
    unsafe { asm!("sti") };
    prev
}

/// Disable interrupts (`cli`), returning the previous status.
///
/// Used by every lock and intrusive-list splice in this kernel to keep the
/// timer IRQ from preempting a half-updated data structure; pair with
/// [`set_status`] on the way out rather than calling [`enable`]
/// unconditionally, so nested critical sections compose.
pub fn disable() -> IntrStatus {
    let prev = get_status();
    // SAFETY: `cli` is always safe to issue from ring 0.
    unsafe { asm!("cli") };
    prev
}

/// Restore a previously saved [`IntrStatus`].
pub fn set_status(status: IntrStatus) {
    match status {
        IntrStatus::On => {
            // SAFETY: `sti` is always safe to issue from ring 0.
            unsafe { asm!("sti") };
        }
        IntrStatus::Off => {
            // SAFETY: `cli` is always safe to issue from ring 0.
            unsafe { asm!("cli") };
        }
    }
}
