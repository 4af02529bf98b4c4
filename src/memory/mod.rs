//! Two-tier memory manager (C4): physical page-frame pools, the kernel and
//! per-task virtual-address bitmaps, the recursive page-table installer,
//! and (via [`heap`]) the arena/slab heap built on top.
//!
//! Grounded on `examples/original_source/kernel/memory.c`. The reference
//! pins its pool bitmaps at a fixed physical address (`MEM_BITMAP_BASE`)
//! because it runs before any allocator exists; we keep the same
//! "reserve the backing store up front" shape but back it with static
//! arrays sized generously for a QEMU-class machine (see
//! `KERNEL_POOL_BITMAP_BYTES` et al.) rather than poking at a raw address,
//! since Rust gives us a clean way to reserve that storage statically.

pub mod heap;
pub mod paging;

use spin::Mutex;

use crate::bitmap::Bitmap;
use crate::config::{KERNEL_VADDR_START, LOW_MEMORY_CEILING, PAGE_SIZE, USER_STACK3_VADDR, USER_VADDR_START};
use crate::error::{KernelError, KernelResult};

/// Which physical pool (and, for virtual addresses, which allocator) a
/// request draws from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PoolFlags {
    /// Kernel pages: always mapped into every address space's high half.
    Kernel,
    /// User pages: mapped only into the owning process's page directory.
    User,
}

struct PoolInner {
    bitmap: Bitmap,
    phys_start: usize,
}

/// One `Pool`, backed by a fixed-capacity bitmap allocated statically.
/// The bitmap itself is the "mutex" granularity named in §3: every
/// mutation goes through the enclosing `Mutex`.
struct Pool {
    inner: Mutex<Option<PoolInner>>,
}

impl Pool {
    const fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn init(&self, storage: *mut u8, storage_len: usize, free_pages: usize, phys_start: usize) {
        let mut bitmap = unsafe { Bitmap::from_raw_parts(storage, storage_len) };
        bitmap.init();
        *self.inner.lock() = Some(PoolInner {
            bitmap,
            phys_start,
        });
        let _ = free_pages;
    }

    fn alloc_frame(&self) -> Option<usize> {
        let mut guard = self.inner.lock();
        let pool = guard.as_mut().expect("memory manager not initialized");
        let idx = pool.bitmap.scan(1)?;
        pool.bitmap.set(idx, true);
        Some(pool.phys_start + idx * PAGE_SIZE)
    }

    fn free_frame(&self, phys_addr: usize) {
        let mut guard = self.inner.lock();
        let pool = guard.as_mut().expect("memory manager not initialized");
        let idx = (phys_addr - pool.phys_start) / PAGE_SIZE;
        pool.bitmap.set(idx, false);
    }

    fn phys_start(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .expect("memory manager not initialized")
            .phys_start
    }
}

static KERNEL_POOL: Pool = Pool::empty();
static USER_POOL: Pool = Pool::empty();
static KERNEL_VADDR_BITMAP: Mutex<Option<Bitmap>> = Mutex::new(None);

/// Bitmap capacity: 2 KiB covers 16384 pages (64 MiB) per pool, enough for
/// any machine this kernel is meant to run on (§1 targets a small QEMU-class
/// box, not a server with hundreds of MiB of RAM).
const POOL_BITMAP_BYTES: usize = 2048;
const VADDR_BITMAP_BYTES: usize = 2048;

static mut KERNEL_POOL_BITMAP_STORAGE: [u8; POOL_BITMAP_BYTES] = [0; POOL_BITMAP_BYTES];
static mut USER_POOL_BITMAP_STORAGE: [u8; POOL_BITMAP_BYTES] = [0; POOL_BITMAP_BYTES];
static mut KERNEL_VADDR_BITMAP_STORAGE: [u8; VADDR_BITMAP_BYTES] = [0; VADDR_BITMAP_BYTES];

/// Physical memory below this mark is the kernel image and BIOS data area,
/// reserved outside either pool (mirrors `used_mem` in the reference).
const LOW_RESERVED: usize = 0x20_0000;

/// Build both physical pools and the kernel virtual-address bitmap from
/// `total_mem_bytes` (as reported by the boot protocol). Must run once,
/// before any other call into this module.
pub fn init(total_mem_bytes: usize) {
    let usable = total_mem_bytes.saturating_sub(LOW_RESERVED);
    let total_free_pages = (usable / PAGE_SIZE).min(2 * POOL_BITMAP_BYTES * 8);
    let kernel_free_pages = total_free_pages / 2;
    let user_free_pages = total_free_pages - kernel_free_pages;

    let kp_start = LOW_RESERVED;
    let up_start = kp_start + kernel_free_pages * PAGE_SIZE;

    let kbm_len = kernel_free_pages.div_ceil(8).min(POOL_BITMAP_BYTES);
    let ubm_len = user_free_pages.div_ceil(8).min(POOL_BITMAP_BYTES);

    // SAFETY: these statics are written only here, once, before any other
    // module can observe them (pools are otherwise behind their `Mutex`).
    unsafe {
        KERNEL_POOL.init(
            core::ptr::addr_of_mut!(KERNEL_POOL_BITMAP_STORAGE).cast(),
            kbm_len,
            kernel_free_pages,
            kp_start,
        );
        USER_POOL.init(
            core::ptr::addr_of_mut!(USER_POOL_BITMAP_STORAGE).cast(),
            ubm_len,
            user_free_pages,
            up_start,
        );

        let mut kvbm = Bitmap::from_raw_parts(
            core::ptr::addr_of_mut!(KERNEL_VADDR_BITMAP_STORAGE).cast(),
            kbm_len,
        );
        kvbm.init();
        *KERNEL_VADDR_BITMAP.lock() = Some(kvbm);
    }

    heap::block_desc_init();
}

fn vaddr_get(pf: PoolFlags, page_cnt: usize) -> Option<usize> {
    match pf {
        PoolFlags::Kernel => {
            let mut guard = KERNEL_VADDR_BITMAP.lock();
            let bitmap = guard.as_mut().expect("memory manager not initialized");
            let start = bitmap.scan(page_cnt)?;
            for i in 0..page_cnt {
                bitmap.set(start + i, true);
            }
            Some(KERNEL_VADDR_START + start * PAGE_SIZE)
        }
        PoolFlags::User => {
            let pcb = crate::sched::current();
            // SAFETY: `pcb` is the live current PCB; its vaddr bitmap is
            // only ever touched with interrupts-disabled-by-caller
            // discipline matching every other bitmap in this kernel.
            let bitmap = unsafe { (*pcb).userprog_vaddr.as_mut() }
                .expect("vaddr_get(User) from a kernel thread");
            let start = bitmap.scan(page_cnt)?;
            for i in 0..page_cnt {
                bitmap.set(start + i, true);
            }
            let vaddr = USER_VADDR_START + start * PAGE_SIZE;
            assert!(vaddr < USER_STACK3_VADDR, "user vaddr request overruns the stack slot");
            Some(vaddr)
        }
    }
}

fn vaddr_remove(pf: PoolFlags, vaddr: usize, page_cnt: usize) {
    match pf {
        PoolFlags::Kernel => {
            let mut guard = KERNEL_VADDR_BITMAP.lock();
            let bitmap = guard.as_mut().expect("memory manager not initialized");
            let start = (vaddr - KERNEL_VADDR_START) / PAGE_SIZE;
            for i in 0..page_cnt {
                bitmap.set(start + i, false);
            }
        }
        PoolFlags::User => {
            let pcb = crate::sched::current();
            // SAFETY: see `vaddr_get`.
            let bitmap = unsafe { (*pcb).userprog_vaddr.as_mut() }
                .expect("vaddr_remove(User) from a kernel thread");
            let start = (vaddr - USER_VADDR_START) / PAGE_SIZE;
            for i in 0..page_cnt {
                bitmap.set(start + i, false);
            }
        }
    }
}

fn pool_of(pf: PoolFlags) -> &'static Pool {
    match pf {
        PoolFlags::Kernel => &KERNEL_POOL,
        PoolFlags::User => &USER_POOL,
    }
}

/// Install one PTE mapping `vaddr -> paddr`, allocating and zeroing a new
/// page table (always out of the *kernel* pool, even for a user mapping)
/// if the owning PDE is not yet present.
///
/// # Safety
/// `vaddr`'s page must not already be mapped.
pub unsafe fn map(vaddr: usize, paddr: usize, user: bool) {
    let pde = paging::pde_ptr(vaddr);
    let pte = paging::pte_ptr(vaddr);
    let flags = paging::PG_PRESENT | paging::PG_RW | if user { paging::PG_USER } else { 0 };

    // SAFETY: `pde`/`pte` are valid addresses through the recursive
    // mapping as long as the caller's page directory has the self-map
    // installed (true for every address space this kernel builds).
    unsafe {
        if *pde & paging::PG_PRESENT != 0 {
            assert!(*pte & paging::PG_PRESENT == 0, "pte already present at {vaddr:#x}");
            *pte = (paddr as u32) | flags as u32;
        } else {
            let pt_frame = KERNEL_POOL.alloc_frame().expect("out of kernel pool frames for a page table");
            *pde = (pt_frame as u32) | paging::PG_PRESENT as u32 | paging::PG_RW as u32 | paging::PG_USER as u32;
            core::ptr::write_bytes((pte as usize & !0xFFF) as *mut u8, 0, PAGE_SIZE);
            assert!(*pte & paging::PG_PRESENT == 0, "pte already present at {vaddr:#x}");
            *pte = (paddr as u32) | flags as u32;
        }
    }
    // SAFETY: invalidating the TLB entry we just installed is always
    // sound; the address is ours by construction.
    unsafe { paging::invlpg(vaddr) };
}

fn unmap(vaddr: usize) {
    let pte = paging::pte_ptr(vaddr);
    // SAFETY: clearing the present bit of a PTE this module installed.
    unsafe {
        *pte &= !(paging::PG_PRESENT as u32);
        paging::invlpg(vaddr);
    }
}

/// Reserve `page_cnt` virtual pages and back every one of them with a
/// freshly allocated physical frame, installing the mapping as it goes.
///
/// If a physical-frame allocation fails partway through, every PTE already
/// installed for this request is unmapped and its frame freed before
/// returning — the spec requires this (§9 open question), unlike the
/// reference, which leaks the partial mapping.
pub fn malloc_page(pf: PoolFlags, page_cnt: usize) -> KernelResult<usize> {
    assert!(page_cnt > 0, "malloc_page: page_cnt must be nonzero");
    let vaddr_start = vaddr_get(pf, page_cnt).ok_or(KernelError::OutOfVirtualAddressSpace)?;

    let pool = pool_of(pf);
    let user = matches!(pf, PoolFlags::User);
    for i in 0..page_cnt {
        let vaddr = vaddr_start + i * PAGE_SIZE;
        match pool.alloc_frame() {
            Some(paddr) => {
                // SAFETY: `vaddr` was just reserved by `vaddr_get` and is
                // not mapped yet.
                unsafe { map(vaddr, paddr, user) };
            }
            None => {
                for done in 0..i {
                    let mapped_vaddr = vaddr_start + done * PAGE_SIZE;
                    let paddr = addr_v2p(mapped_vaddr);
                    unmap(mapped_vaddr);
                    pool.free_frame(paddr);
                }
                vaddr_remove(pf, vaddr_start, page_cnt);
                return Err(KernelError::OutOfPhysicalMemory);
            }
        }
    }
    Ok(vaddr_start)
}

/// `malloc_page` for the kernel pool, zeroing the result.
pub fn get_kernel_pages(page_cnt: usize) -> KernelResult<usize> {
    let vaddr = malloc_page(PoolFlags::Kernel, page_cnt)?;
    // SAFETY: every page in this range was just freshly mapped above.
    unsafe { core::ptr::write_bytes(vaddr as *mut u8, 0, page_cnt * PAGE_SIZE) };
    Ok(vaddr)
}

/// `malloc_page` for the current task's user pool, zeroing the result.
/// Serializes on the user pool's own mutex (in addition to the bitmap
/// locks `malloc_page` already takes), matching the reference's explicit
/// `lock_acquire(&user_pool.lock)` around the whole sequence.
static USER_POOL_SEQUENCE_LOCK: Mutex<()> = Mutex::new(());

pub fn get_user_pages(page_cnt: usize) -> KernelResult<usize> {
    let _guard = USER_POOL_SEQUENCE_LOCK.lock();
    let vaddr = malloc_page(PoolFlags::User, page_cnt)?;
    // SAFETY: every page in this range was just freshly mapped above.
    unsafe { core::ptr::write_bytes(vaddr as *mut u8, 0, page_cnt * PAGE_SIZE) };
    Ok(vaddr)
}

/// Install a single frame at a caller-chosen virtual address (the slot was
/// reserved out-of-band, e.g. the user-stack page during process spawn).
pub fn get_a_page(pf: PoolFlags, vaddr: usize) -> KernelResult<usize> {
    let pool = pool_of(pf);
    let paddr = pool.alloc_frame().ok_or(KernelError::OutOfPhysicalMemory)?;
    // SAFETY: the caller reserved `vaddr` out-of-band and guarantees it is
    // not already mapped.
    unsafe { map(vaddr, paddr, matches!(pf, PoolFlags::User)) };
    Ok(vaddr)
}

/// Physical address backing `vaddr`, read through the recursive mapping.
pub fn addr_v2p(vaddr: usize) -> usize {
    let pte = paging::pte_ptr(vaddr);
    // SAFETY: reading a present PTE through the recursive alias window.
    let raw = unsafe { *pte };
    (raw as usize & !0xFFF) | (vaddr & 0xFFF)
}

fn pfree(paddr: usize) {
    if paddr >= USER_POOL.phys_start() {
        USER_POOL.free_frame(paddr);
    } else {
        KERNEL_POOL.free_frame(paddr);
    }
}

/// Free `page_cnt` pages starting at `vaddr`: clear each PTE, invalidate
/// its TLB entry, return the physical frame to its owning pool, then clear
/// the virtual-address bitmap bits.
pub fn mfree_page(pf: PoolFlags, vaddr: usize, page_cnt: usize) {
    assert!(page_cnt >= 1 && vaddr % PAGE_SIZE == 0, "mfree_page: misaligned request");
    for i in 0..page_cnt {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        let paddr = addr_v2p(page_vaddr);
        assert!(
            paddr % PAGE_SIZE == 0 && paddr >= LOW_MEMORY_CEILING,
            "mfree_page: freeing below the low-memory ceiling is a fatal bug"
        );
        pfree(paddr);
        unmap(page_vaddr);
    }
    vaddr_remove(pf, vaddr, page_cnt);
}
