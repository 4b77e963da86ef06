//! Global allocator for bare-metal targets.
//!
//! The blocks and bitmap of the packet [`MemPool`] live on the heap.
//! Targets without an allocator enable the `global_allocator` feature and
//! call [`init_heap`] before building the pool.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ static HEAP_BUFFER (page aligned, .bss)      │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ MemPool blocks (n × BLOCK_SIZE)        │  │
//! │  ├────────────────────────────────────────┤  │
//! │  │ pool bitmap                            │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! [`MemPool`]: crate::buffer::MemPool

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{addr_of_mut, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use linked_list_allocator::Heap;

/// Room for a 128-block pool plus bookkeeping.
pub const HEAP_SIZE: usize = 256 * 1024;

#[repr(C, align(4096))]
struct AlignedHeapBuffer([u8; HEAP_SIZE]);

static mut HEAP_BUFFER: AlignedHeapBuffer = AlignedHeapBuffer([0u8; HEAP_SIZE]);

static HEAP_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// [`Heap`] behind a spin lock.
pub struct LockedHeap {
    inner: spin::Mutex<Heap>,
}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            inner: spin::Mutex::new(Heap::empty()),
        }
    }

    /// # Safety
    /// The region must be valid, unused elsewhere, and handed over once.
    unsafe fn init(&self, start: *mut u8, size: usize) {
        self.inner.lock().init(start, size);
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner
            .lock()
            .allocate_first_fit(layout)
            .map(|nn| nn.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(nn) = NonNull::new(ptr) {
            self.inner.lock().deallocate(nn, layout);
        }
    }
}

#[cfg_attr(not(test), global_allocator)]
static GLOBAL: LockedHeap = LockedHeap::empty();

/// Hand the static buffer to the allocator. Later calls do nothing.
///
/// # Safety
/// Must run before the first allocation.
pub unsafe fn init_heap() {
    if HEAP_INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    let start = addr_of_mut!(HEAP_BUFFER.0) as *mut u8;
    GLOBAL.init(start, HEAP_SIZE);
    log::debug!("[HEAP] {} KiB at {:p}", HEAP_SIZE / 1024, start);
}

pub fn is_initialized() -> bool {
    HEAP_INITIALIZED.load(Ordering::Acquire)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub total_size: usize,
    pub used: usize,
    pub free: usize,
}

pub fn heap_stats() -> HeapStats {
    let heap = GLOBAL.inner.lock();
    HeapStats {
        total_size: heap.size(),
        used: heap.used(),
        free: heap.free(),
    }
}
