//! Arena/slab heap built on top of the page allocator (C4 continued).
//!
//! Grounded on `examples/original_source/kernel/memory.c`'s
//! `block_desc_init`/`sys_malloc`/`sys_free`. Small requests (`<=
//! MAX_SMALL_ALLOC`) are served from one of seven fixed size-class arenas;
//! anything larger gets its own run of pages. Every arena starts with an
//! [`ArenaHeader`] that remembers which size class it belongs to (or that
//! it is a large allocation) so `sys_free` can find its way back without
//! the caller passing a size.
//!
//! The reference keeps one such set of descriptors per task (`u_block_desc`
//! in `thread.h`) as well as the kernel-global set `kernel_blkdescs`; both
//! are the same shape, so [`Heap`] is generic over which pool backs it and
//! gets instantiated twice: once as [`KERNEL_HEAP`], and once per process
//! inside its [`crate::sched::pcb::Pcb`].

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;

use spin::Mutex;

use crate::config::{PAGE_SIZE, SIZE_CLASSES};
use crate::list::{List, ListElem};

use super::PoolFlags;

struct BlockDescState {
    block_size: usize,
    blocks_per_arena: usize,
    free_list: List,
}

const fn blocks_per_arena(block_size: usize) -> usize {
    (PAGE_SIZE - size_of::<ArenaHeader>()) / block_size
}

const fn desc_for(block_size: usize) -> BlockDescState {
    BlockDescState {
        block_size,
        blocks_per_arena: blocks_per_arena(block_size),
        free_list: List::new(),
    }
}

/// Sentinel `desc_idx` marking a large, multi-page allocation with no
/// associated size class.
const LARGE_DESC_IDX: usize = usize::MAX;

#[repr(C)]
struct ArenaHeader {
    desc_idx: usize,
    /// For a small arena: number of blocks currently handed out. For a
    /// large allocation: number of pages reserved.
    cnt: usize,
}

fn size_class_idx(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&class| class >= size)
}

fn arena_of(block: *mut u8) -> *mut ArenaHeader {
    (block as usize & !(PAGE_SIZE - 1)) as *mut ArenaHeader
}

/// A slab heap drawing its arenas from one physical pool.
pub struct Heap {
    descs: Mutex<[BlockDescState; 7]>,
    pool: PoolFlags,
}

impl Heap {
    pub const fn new(pool: PoolFlags) -> Self {
        Self {
            descs: Mutex::new([
                desc_for(16),
                desc_for(32),
                desc_for(64),
                desc_for(128),
                desc_for(256),
                desc_for(512),
                desc_for(1024),
            ]),
            pool,
        }
    }

    /// Wire up every size-class free list. Must run once, after `self` has
    /// reached its final address (true immediately for a `static`; for a
    /// [`crate::sched::pcb::Pcb`]-embedded heap, once the owning page has
    /// been claimed).
    pub fn init(&self) {
        let mut descs = self.descs.lock();
        for desc in descs.iter_mut() {
            desc.free_list.init();
        }
        debug_assert_eq!(descs.len(), SIZE_CLASSES.len());
        for (desc, &size) in descs.iter().zip(SIZE_CLASSES.iter()) {
            debug_assert_eq!(desc.block_size, size);
        }
    }

    fn get_pages(&self, page_cnt: usize) -> Option<usize> {
        match self.pool {
            PoolFlags::Kernel => super::get_kernel_pages(page_cnt).ok(),
            PoolFlags::User => super::get_user_pages(page_cnt).ok(),
        }
    }

    /// Allocate `size` bytes, or null on exhaustion. The reference's
    /// `sys_malloc`.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        if size > crate::config::MAX_SMALL_ALLOC {
            let total = size + size_of::<ArenaHeader>();
            let page_cnt = total.div_ceil(PAGE_SIZE);
            let Some(vaddr) = self.get_pages(page_cnt) else {
                return ptr::null_mut();
            };
            // SAFETY: `vaddr` is a freshly mapped, zeroed run of
            // `page_cnt` pages we just allocated.
            unsafe {
                let header = vaddr as *mut ArenaHeader;
                (*header).desc_idx = LARGE_DESC_IDX;
                (*header).cnt = page_cnt;
                return header.add(1).cast();
            }
        }

        let Some(idx) = size_class_idx(size) else {
            return ptr::null_mut();
        };

        let mut descs = self.descs.lock();

        if descs[idx].free_list.is_empty() {
            let Some(arena_vaddr) = self.get_pages(1) else {
                return ptr::null_mut();
            };
            // SAFETY: `arena_vaddr` is a freshly mapped, zeroed page.
            unsafe {
                let header = arena_vaddr as *mut ArenaHeader;
                (*header).desc_idx = idx;
                (*header).cnt = 0;

                let block_size = descs[idx].block_size;
                let blocks_per_arena = descs[idx].blocks_per_arena;
                let base = header.add(1).cast::<u8>();
                for i in 0..blocks_per_arena {
                    let block = base.add(i * block_size).cast::<ListElem>();
                    block.write(ListElem::new());
                    descs[idx].free_list.push(block);
                }
            }
        }

        // SAFETY: the free list is non-empty by construction above.
        let block = descs[idx].free_list.pop().expect("free list just populated");
        // SAFETY: `block` came from this arena's own block region.
        unsafe {
            let arena = arena_of(block.cast());
            (*arena).cnt += 1;
        }
        block.cast()
    }

    /// Return a pointer previously handed out by [`Heap::malloc`] on this
    /// same `Heap`.
    ///
    /// # Safety
    /// `ptr` must be exactly a pointer this heap's `malloc` returned, and
    /// must not be freed twice.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let arena = arena_of(ptr);
        // SAFETY: `arena` is the header of the arena `ptr` was carved
        // from, by the `malloc` contract.
        let (desc_idx, cnt) = unsafe { ((*arena).desc_idx, (*arena).cnt) };

        if desc_idx == LARGE_DESC_IDX {
            super::mfree_page(self.pool, arena as usize, cnt);
            return;
        }

        let mut descs = self.descs.lock();
        let block = ptr.cast::<ListElem>();
        // SAFETY: `block` was handed out by `malloc` from this
        // descriptor's arena, so it is not currently linked into any
        // list.
        unsafe { descs[desc_idx].free_list.push(block) };

        let remaining = cnt - 1;
        // SAFETY: see above.
        unsafe { (*arena).cnt = remaining };

        if remaining == 0 {
            let blocks_per_arena = descs[desc_idx].blocks_per_arena;
            let block_size = descs[desc_idx].block_size;
            // SAFETY: `arena` was allocated by `get_pages(1)` above and
            // every block inside it is either free (already unlinked
            // below) or was the one just returned above.
            unsafe {
                let base = (arena as *mut ArenaHeader).add(1).cast::<u8>();
                for i in 0..blocks_per_arena {
                    let candidate = base.add(i * block_size).cast::<ListElem>();
                    if descs[desc_idx].free_list.contains(candidate) {
                        List::remove(candidate);
                    }
                }
            }
            super::mfree_page(self.pool, arena as usize, 1);
        }
    }
}

static KERNEL_HEAP: Heap = Heap::new(PoolFlags::Kernel);

/// Wire up the kernel-global heap. Called once from [`super::init`].
pub fn block_desc_init() {
    KERNEL_HEAP.init();
}

/// Allocate `size` bytes from the kernel heap, or null on exhaustion.
pub fn sys_malloc(size: usize) -> *mut u8 {
    KERNEL_HEAP.malloc(size)
}

/// Return a pointer previously handed out by [`sys_malloc`].
///
/// # Safety
/// `ptr` must be exactly a pointer `sys_malloc` returned, and must not be
/// freed twice.
pub unsafe fn sys_free(ptr: *mut u8) {
    // SAFETY: forwarding the caller's contract.
    unsafe { KERNEL_HEAP.free(ptr) }
}

/// Adapter handing the kernel heap to `#[global_allocator]`.
pub struct KernelAllocator;

// SAFETY: `sys_malloc`/`sys_free` satisfy `GlobalAlloc`'s contract: the
// returned pointer (when non-null) is valid for `layout.size()` bytes and
// aligned to at least `core::mem::align_of::<ArenaHeader>()`, which covers
// every alignment this kernel's callers request (`usize`-sized or
// smaller).
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        sys_malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: forwarding the caller's contract.
        unsafe { sys_free(ptr) }
    }
}

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[cfg(test)]
mod tests {
    extern crate alloc;

    #[test_case]
    fn small_alloc_roundtrips() {
        let v = alloc::vec![1_u8, 2, 3, 4];
        assert_eq!(v, [1, 2, 3, 4]);
    }

    #[test_case]
    fn large_alloc_roundtrips() {
        let v = alloc::vec![0_u8; 4096];
        assert_eq!(v.len(), 4096);
    }
}
