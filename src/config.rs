//! Centralized kernel constants.
//!
//! Every other module imports its magic numbers from here instead of
//! re-declaring them locally.

/// Size of one page / page frame.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel written at a fixed offset in every PCB; checked on each timer
/// tick to detect kernel-stack overflow into the PCB header.
pub const STACK_MAGIC: u32 = 0x1987_0916;

/// Root of the kernel virtual-address bitmap.
pub const KERNEL_VADDR_START: usize = 0xC010_0000;

/// Root of a user process's virtual-address bitmap.
pub const USER_VADDR_START: usize = 0x0804_8000;

/// Virtual address of the (single) user-mode stack page, just below the
/// kernel's high half.
pub const USER_STACK3_VADDR: usize = 0xC000_0000 - PAGE_SIZE;

/// Physical pages below this address belong to the kernel image / low
/// memory and must never be handed back to a pool.
pub const LOW_MEMORY_CEILING: usize = 0x10_2000;

/// Index of the recursive self-map entry in every page directory.
pub const RECURSIVE_PDE_INDEX: usize = 1023;

/// First page-directory index that belongs to the kernel high half.
pub const KERNEL_PDE_START: usize = 0x300;

/// Heap size classes, smallest to largest.
pub const SIZE_CLASSES: [usize; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Largest allocation still served by a size-class arena; anything bigger
/// is a "large" multi-page allocation.
pub const MAX_SMALL_ALLOC: usize = 1024;

/// Desired timer frequency in Hz.
pub const PIT_FREQUENCY_HZ: u32 = 100;

/// PIT oscillator frequency, used to compute the reload divisor.
pub const PIT_OSCILLATOR_HZ: u32 = 1_193_180;

/// PIT channel 0 data port.
pub const PIT_CHANNEL0_PORT: u16 = 0x40;
/// PIT mode/command port.
pub const PIT_COMMAND_PORT: u16 = 0x43;

/// Master PIC command port.
pub const PIC1_COMMAND: u16 = 0x20;
/// Master PIC data port.
pub const PIC1_DATA: u16 = 0x21;
/// Slave PIC command port.
pub const PIC2_COMMAND: u16 = 0xA0;
/// Slave PIC data port.
pub const PIC2_DATA: u16 = 0xA1;

/// Vector at which IRQ0 (master PIC) lands after remap.
pub const PIC1_VECTOR_OFFSET: u8 = 0x20;
/// Vector at which IRQ8 (slave PIC) lands after remap.
pub const PIC2_VECTOR_OFFSET: u8 = 0x28;

/// Primary ATA channel I/O port base.
pub const ATA_PRIMARY_BASE: u16 = 0x1F0;
/// Primary ATA channel control port base.
pub const ATA_PRIMARY_CTRL: u16 = 0x3F6;
/// Primary ATA channel IRQ vector (IRQ14 after remap).
pub const ATA_PRIMARY_VECTOR: u8 = 0x2E;

/// Secondary ATA channel I/O port base.
pub const ATA_SECONDARY_BASE: u16 = 0x170;
/// Secondary ATA channel control port base.
pub const ATA_SECONDARY_CTRL: u16 = 0x376;
/// Secondary ATA channel IRQ vector (IRQ15 after remap).
pub const ATA_SECONDARY_VECTOR: u8 = 0x2F;

/// Maximum LBA accepted by the driver: an 80 MiB disk ceiling, used as a
/// debug guard against runaway requests.
pub const ATA_MAX_LBA: u32 = (80 * 1024 * 1024 / 512) - 1;

/// Number of fixed file-descriptor slots per task.
pub const FD_TABLE_SIZE: usize = 8;

/// Number of entries in the fixed syscall dispatch table.
pub const SYSCALL_TABLE_SIZE: usize = 32;

/// Size of the double-fault handler stack.
pub const DOUBLE_FAULT_STACK_SIZE: usize = PAGE_SIZE * 2;

/// Priority (and time-slice refill) of the idle thread.
pub const IDLE_THREAD_PRIORITY: u8 = 10;

/// Default time-slice priority handed to a thread that does not ask for a
/// specific one (the boot thread, `ps`-visible "main").
pub const DEFAULT_THREAD_PRIORITY: u8 = 31;

/// Size of the one-page boot stack the CPU is running on before the
/// scheduler claims it as the "main" thread's kernel stack.
pub const BOOT_STACK_SIZE: usize = PAGE_SIZE;

/// Number of physical megabytes this kernel assumes are installed.
///
/// The boot protocol this kernel uses does not hand back a parsed memory
/// map (see `DESIGN.md`); a fixed figure comfortably below any QEMU `-m`
/// default keeps `memory::init` simple without risking running past real
/// RAM.
pub const ASSUMED_TOTAL_MEM_BYTES: usize = 64 * 1024 * 1024;

/// Megabytes of physical memory identity-mapped by the paging bootstrap
/// before the recursive mapping takes over (covers the kernel image, boot
/// stack, and early static allocations).
pub const IDENTITY_MAP_MIB: usize = 8;

/// Maximum polling time for the IDE busy-wait loop, in milliseconds.
pub const ATA_BUSY_WAIT_TIMEOUT_MS: u32 = 30_000;

/// Step size subtracted from the busy-wait budget between polls.
pub const ATA_BUSY_WAIT_STEP_MS: u32 = 10;
