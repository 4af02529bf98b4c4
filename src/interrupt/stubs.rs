//! Raw per-vector interrupt entry stubs and the common `intr_exit` path.
//!
//! Every vector 0x00-0x2F, plus the syscall gate at 0x80, gets its own tiny
//! stub that pushes a dummy error code (for the vectors the CPU doesn't
//! supply one for), the segment registers, the general-purpose registers
//! (`pushad`), and finally the vector number, before falling into the
//! shared dispatch-and-return path. `intr_exit` is the exact inverse and is
//! also the landing pad
//! `start_process` (see `userspace::process`) jumps into to perform the
//! first ring-3 transition of a fresh user process — it does not care
//! whether the frame it is unwinding was pushed by hardware+this stub or
//! fabricated by software.
//!
//! This is the from-scratch equivalent of the reference kernel's
//! hand-written `kernel.S`; no such file exists in this pack's
//! `original_source`, so the stub shape is derived directly from the
//! `intr_stack` layout in §3 of the spec and from the push/pop symmetry
//! `thread::switch_to`/`process::start_process` depend on.

use core::arch::global_asm;

global_asm!(
    r#"
.intel_syntax noprefix
.section .text

.macro VECTOR num has_error_code
.global intr_vector_\num
intr_vector_\num:
.if \has_error_code == 0
    push 0
.endif
    push ds
    push es
    push fs
    push gs
    pushad
    push \num
    call rust_interrupt_dispatch
    add esp, 4
    jmp intr_exit
.endm

VECTOR 0, 0
VECTOR 1, 0
VECTOR 2, 0
VECTOR 3, 0
VECTOR 4, 0
VECTOR 5, 0
VECTOR 6, 0
VECTOR 7, 0
VECTOR 8, 1
VECTOR 9, 0
VECTOR 10, 1
VECTOR 11, 1
VECTOR 12, 1
VECTOR 13, 1
VECTOR 14, 1
VECTOR 15, 0
VECTOR 16, 0
VECTOR 17, 1
VECTOR 18, 0
VECTOR 19, 0
VECTOR 20, 0
VECTOR 21, 0
VECTOR 22, 0
VECTOR 23, 0
VECTOR 24, 0
VECTOR 25, 0
VECTOR 26, 0
VECTOR 27, 0
VECTOR 28, 0
VECTOR 29, 0
VECTOR 30, 0
VECTOR 31, 0
VECTOR 32, 0
VECTOR 33, 0
VECTOR 34, 0
VECTOR 35, 0
VECTOR 36, 0
VECTOR 37, 0
VECTOR 38, 0
VECTOR 39, 0
VECTOR 40, 0
VECTOR 41, 0
VECTOR 42, 0
VECTOR 43, 0
VECTOR 44, 0
VECTOR 45, 0
VECTOR 46, 0
VECTOR 47, 0

// The syscall gate (int 0x80, C10). Not part of the contiguous 0x00-0x2F
// hardware/exception run, so it gets its own stub and its own IDT slot
// rather than a spot in `STUB_TABLE`.
.global intr_vector_syscall
intr_vector_syscall:
    push 0
    push ds
    push es
    push fs
    push gs
    pushad
    push 128
    call rust_interrupt_dispatch
    add esp, 4
    jmp intr_exit

.global intr_exit
intr_exit:
    popad
    pop gs
    pop fs
    pop es
    pop ds
    add esp, 4
    iretd
"#
);

/// Address of the per-vector entry stub, looked up by vector number.
///
/// The IDT installer uses this to point every gate at its own stub. Each
/// stub is a distinct symbol emitted by `VECTOR` above, so they are
/// declared one by one rather than generated from a loop.
unsafe extern "C" {
    safe fn intr_vector_0();
    safe fn intr_vector_1();
    safe fn intr_vector_2();
    safe fn intr_vector_3();
    safe fn intr_vector_4();
    safe fn intr_vector_5();
    safe fn intr_vector_6();
    safe fn intr_vector_7();
    safe fn intr_vector_8();
    safe fn intr_vector_9();
    safe fn intr_vector_10();
    safe fn intr_vector_11();
    safe fn intr_vector_12();
    safe fn intr_vector_13();
    safe fn intr_vector_14();
    safe fn intr_vector_15();
    safe fn intr_vector_16();
    safe fn intr_vector_17();
    safe fn intr_vector_18();
    safe fn intr_vector_19();
    safe fn intr_vector_20();
    safe fn intr_vector_21();
    safe fn intr_vector_22();
    safe fn intr_vector_23();
    safe fn intr_vector_24();
    safe fn intr_vector_25();
    safe fn intr_vector_26();
    safe fn intr_vector_27();
    safe fn intr_vector_28();
    safe fn intr_vector_29();
    safe fn intr_vector_30();
    safe fn intr_vector_31();
    safe fn intr_vector_32();
    safe fn intr_vector_33();
    safe fn intr_vector_34();
    safe fn intr_vector_35();
    safe fn intr_vector_36();
    safe fn intr_vector_37();
    safe fn intr_vector_38();
    safe fn intr_vector_39();
    safe fn intr_vector_40();
    safe fn intr_vector_41();
    safe fn intr_vector_42();
    safe fn intr_vector_43();
    safe fn intr_vector_44();
    safe fn intr_vector_45();
    safe fn intr_vector_46();
    safe fn intr_vector_47();

    /// The syscall gate's own stub; installed directly into IDT slot 0x80
    /// by `interrupt::init`, outside `STUB_TABLE`'s contiguous range.
    pub(crate) safe fn intr_vector_syscall();
}

/// The 48 stub entry points, indexed by vector number, used to populate the
/// IDT's gate descriptors.
pub static STUB_TABLE: [unsafe extern "C" fn(); 48] = [
    intr_vector_0,
    intr_vector_1,
    intr_vector_2,
    intr_vector_3,
    intr_vector_4,
    intr_vector_5,
    intr_vector_6,
    intr_vector_7,
    intr_vector_8,
    intr_vector_9,
    intr_vector_10,
    intr_vector_11,
    intr_vector_12,
    intr_vector_13,
    intr_vector_14,
    intr_vector_15,
    intr_vector_16,
    intr_vector_17,
    intr_vector_18,
    intr_vector_19,
    intr_vector_20,
    intr_vector_21,
    intr_vector_22,
    intr_vector_23,
    intr_vector_24,
    intr_vector_25,
    intr_vector_26,
    intr_vector_27,
    intr_vector_28,
    intr_vector_29,
    intr_vector_30,
    intr_vector_31,
    intr_vector_32,
    intr_vector_33,
    intr_vector_34,
    intr_vector_35,
    intr_vector_36,
    intr_vector_37,
    intr_vector_38,
    intr_vector_39,
    intr_vector_40,
    intr_vector_41,
    intr_vector_42,
    intr_vector_43,
    intr_vector_44,
    intr_vector_45,
    intr_vector_46,
    intr_vector_47,
];

unsafe extern "C" {
    /// The shared stub epilogue. Also the landing pad for a freshly
    /// fabricated user-process stack (`userspace::process::start_process`).
    pub safe fn intr_exit();
}
