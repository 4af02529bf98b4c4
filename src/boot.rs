//! Multiboot header and the paging bootstrap that gets this kernel from
//! flat 32-bit protected mode into its own recursively-mapped address
//! space (C1/C4).
//!
//! The core design calls the boot loader itself an external collaborator
//! (§1's non-goal list names "the boot loader / GDT setup beyond what the
//! kernel itself must program") — this module is deliberately the
//! smallest thing that can satisfy that contract: a multiboot header GRUB
//! or QEMU's `-kernel` loader recognizes, a stack, and a one-time identity
//! map so the recursive self-map every later page directory relies on
//! (`memory::paging`) has something to stand on from instruction one.
//!
//! Every binary linked against this library — the kernel proper and each
//! `tests/*.rs` integration test — shares this single `_start`. What runs
//! after paging is live is a `#[unsafe(no_mangle)] extern "C" fn
//! kernel_entry() -> !` each binary defines for itself, mirroring how the
//! teacher let the `bootloader` crate's `entry_point!` macro resolve a
//! per-binary `main`.

use core::arch::global_asm;

use crate::config::{BOOT_STACK_SIZE, IDENTITY_MAP_MIB, PAGE_SIZE, RECURSIVE_PDE_INDEX};
use crate::memory::paging::{PG_PRESENT, PG_RW};

const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
/// Page-align modules, request a memory map in `multiboot_info` (unused —
/// `ASSUMED_TOTAL_MEM_BYTES` stands in, see `config`).
const MULTIBOOT_FLAGS: u32 = 0x0000_0003;
/// The value GRUB/QEMU leave in `eax` on a successful multiboot handoff.
const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

#[repr(C)]
struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

#[unsafe(link_section = ".boot.header")]
#[used]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
    magic: MULTIBOOT_MAGIC,
    flags: MULTIBOOT_FLAGS,
    checksum: 0_u32
        .wrapping_sub(MULTIBOOT_MAGIC)
        .wrapping_sub(MULTIBOOT_FLAGS),
};

/// One 4 MiB page table's worth of identity-mapped 4 KiB pages.
#[repr(align(4096))]
#[derive(Clone, Copy)]
struct PageTable([u32; 1024]);

const PAGE_TABLE_COUNT: usize = IDENTITY_MAP_MIB.div_ceil(4);

#[repr(align(4096))]
struct PageDir([u32; 1024]);

static mut BOOT_PAGE_DIR: PageDir = PageDir([0; 1024]);
static mut BOOT_PAGE_TABLES: [PageTable; PAGE_TABLE_COUNT] =
    [PageTable([0; 1024]); PAGE_TABLE_COUNT];

global_asm!(
    r#"
.intel_syntax noprefix

.section .bss
.align 4096
boot_stack_bottom:
.skip {stack_size}
boot_stack_top:

.section .boot.text, "ax"
.global _start
_start:
    mov esp, offset boot_stack_top
    push ebx
    push eax
    call {boot_init}
2:
    hlt
    jmp 2b
"#,
    stack_size = const BOOT_STACK_SIZE,
    boot_init = sym boot_init,
);

unsafe extern "C" {
    /// Resolved per-binary via `#[unsafe(no_mangle)]`: the kernel proper
    /// and each integration test in `tests/` define exactly one of these,
    /// the way each used to define its own `main(BootInfo)` under the
    /// teacher's `entry_point!` macro.
    fn kernel_entry() -> !;
}

/// Build the one-time identity map, install the recursive self-map, enable
/// paging, and hand off to `kernel_entry`. Called once, by `_start`, on
/// the boot stack above; never returns.
extern "C" fn boot_init(multiboot_magic: u32, _multiboot_info: u32) -> ! {
    assert!(
        multiboot_magic == MULTIBOOT_BOOTLOADER_MAGIC,
        "not loaded by a multiboot-compliant boot loader"
    );

    // SAFETY: `BOOT_PAGE_DIR`/`BOOT_PAGE_TABLES` are touched only here,
    // once, before any other code can run; nothing else observes them
    // half-built.
    unsafe {
        let dir = core::ptr::addr_of_mut!(BOOT_PAGE_DIR.0);
        let tables = core::ptr::addr_of_mut!(BOOT_PAGE_TABLES);

        for (i, table) in (*tables).iter_mut().enumerate() {
            for (j, entry) in table.0.iter_mut().enumerate() {
                let phys = (i * 1024 + j) * PAGE_SIZE;
                *entry = (phys as u32) | (PG_PRESENT | PG_RW) as u32;
            }
            let table_phys = core::ptr::addr_of!(table.0) as u32;
            (*dir)[i] = table_phys | (PG_PRESENT | PG_RW) as u32;
        }

        (*dir)[RECURSIVE_PDE_INDEX] = (dir as u32) | (PG_PRESENT | PG_RW) as u32;

        let cr3 = dir as u32;
        core::arch::asm!("mov cr3, {0}", in(reg) cr3, options(nostack, preserves_flags));

        let mut cr0: u32;
        core::arch::asm!("mov {0}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        cr0 |= (1 << 31) | (1 << 16); // PG, WP
        core::arch::asm!("mov cr0, {0}", in(reg) cr0, options(nostack, preserves_flags));
    }

    // SAFETY: paging is live and every binary linked against this library
    // defines exactly one `kernel_entry`.
    unsafe { kernel_entry() }
}
