//! Minimal 32-bit GDT and TSS.
//!
//! Out of scope per the core design (treated as an external collaborator
//! with a minimal named interface): this just needs to exist and work, not
//! illustrate anything. Five flat descriptors — null, kernel code, kernel
//! data, user code, user data — plus one TSS descriptor so `esp0` is
//! available for the ring-3-to-ring-0 transition on every interrupt.

use core::arch::asm;
use core::mem::size_of;

use spin::Mutex;

/// Kernel code segment selector (RPL 0).
pub const KERNEL_CODE_SELECTOR: u16 = 1 << 3;
/// Kernel data segment selector (RPL 0).
pub const KERNEL_DATA_SELECTOR: u16 = 2 << 3;
/// User code segment selector (RPL 3).
pub const USER_CODE_SELECTOR: u16 = (3 << 3) | 3;
/// User data segment selector (RPL 3).
pub const USER_DATA_SELECTOR: u16 = (4 << 3) | 3;
/// TSS selector.
const TSS_SELECTOR: u16 = 5 << 3;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn flat(access: u8, gran: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xC0 | gran,
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89,
            granularity: (((limit >> 16) & 0x0F) as u8) | 0x00,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Task State Segment. Only `ss0`/`esp0` are load-bearing: every interrupt
/// taken from ring 3 reloads `esp` from here before pushing the trap frame.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct Tss {
    link: u16,
    _r0: u16,
    esp0: u32,
    ss0: u16,
    _r1: u16,
    esp1: u32,
    ss1: u16,
    _r2: u16,
    esp2: u32,
    ss2: u16,
    _r3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _r4: u16,
    cs: u16,
    _r5: u16,
    ss: u16,
    _r6: u16,
    ds: u16,
    _r7: u16,
    fs: u16,
    _r8: u16,
    gs: u16,
    _r9: u16,
    ldt: u16,
    _r10: u16,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        // SAFETY-free: every field is a plain integer, zero is a valid TSS
        // with everything unused except the fields `init`/`set_esp0` write.
        Self {
            link: 0, _r0: 0, esp0: 0, ss0: 0, _r1: 0, esp1: 0, ss1: 0, _r2: 0, esp2: 0, ss2: 0,
            _r3: 0, cr3: 0, eip: 0, eflags: 0, eax: 0, ecx: 0, edx: 0, ebx: 0, esp: 0, ebp: 0,
            esi: 0, edi: 0, es: 0, _r4: 0, cs: 0, _r5: 0, ss: 0, _r6: 0, ds: 0, _r7: 0, fs: 0,
            _r8: 0, gs: 0, _r9: 0, ldt: 0, _r10: 0, trap: 0, iomap_base: 0,
        }
    }
}

static GDT: Mutex<[GdtEntry; GDT_ENTRIES]> = Mutex::new([GdtEntry::null(); GDT_ENTRIES]);
static TSS: Mutex<Tss> = Mutex::new(Tss::new());

/// Build the GDT, install the TSS descriptor, load `gdtr`, reload the
/// segment registers, and load `tr`.
pub fn init() {
    const ACCESS_KERNEL_CODE: u8 = 0x9A;
    const ACCESS_KERNEL_DATA: u8 = 0x92;
    const ACCESS_USER_CODE: u8 = 0xFA;
    const ACCESS_USER_DATA: u8 = 0xF2;
    const GRAN_32BIT: u8 = 0x0F;

    let mut tss = TSS.lock();
    tss.ss0 = KERNEL_DATA_SELECTOR;

    {
        let mut gdt = GDT.lock();
        gdt[0] = GdtEntry::null();
        gdt[1] = GdtEntry::flat(ACCESS_KERNEL_CODE, GRAN_32BIT);
        gdt[2] = GdtEntry::flat(ACCESS_KERNEL_DATA, GRAN_32BIT);
        gdt[3] = GdtEntry::flat(ACCESS_USER_CODE, GRAN_32BIT);
        gdt[4] = GdtEntry::flat(ACCESS_USER_DATA, GRAN_32BIT);
        gdt[5] = GdtEntry::tss(core::ptr::addr_of!(*tss) as u32, (size_of::<Tss>() - 1) as u32);

        let pointer = GdtPointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: gdt.as_ptr() as u32,
        };

        // SAFETY: `pointer` describes the just-built table; the far jump
        // reloads `cs` with the kernel code selector and the subsequent
        // `mov`s reload the data-segment registers, which is required
        // immediately after `lgdt` changes descriptor meanings.
        unsafe {
            asm!(
                "lgdt [{0}]",
                "ljmp {cs}, 2f",
                "2:",
                "mov ax, {ds}",
                "mov ds, ax",
                "mov es, ax",
                "mov fs, ax",
                "mov gs, ax",
                "mov ss, ax",
                in(reg) &pointer,
                cs = const KERNEL_CODE_SELECTOR,
                ds = const KERNEL_DATA_SELECTOR,
                out("ax") _,
            );
            asm!("ltr {0:x}", in(reg) TSS_SELECTOR);
        }
    }
}

/// Point the TSS's ring-0 stack at `esp0`. Called on every context switch so
/// that the next interrupt taken from ring 3 lands on the incoming task's
/// kernel stack instead of the previous task's.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}
