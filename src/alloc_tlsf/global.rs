//! `#[global_allocator]` wiring (§4.2, mirroring the teacher's
//! `memory/heap.rs`, which wraps `linked_list_allocator::LockedHeap` the
//! same way). TLSF replaces `linked_list_allocator` here because the spec
//! mandates O(1) segregated-fit placement and an integrity auditor that
//! `linked_list_allocator` doesn't provide.
//!
//! Because this kernel has no virtual memory, the backing pool is a single
//! statically sized byte array rather than a paged virtual range — a
//! deliberate divergence from the teacher's paging-backed heap.

use core::alloc::{GlobalAlloc, Layout};

use crate::sync::SpinLock;

use super::tlsf::{AllocError, Stats, Tlsf};

pub struct GlobalTlsf {
    inner: SpinLock<Tlsf>,
}

impl GlobalTlsf {
    pub const fn empty() -> Self {
        Self {
            inner: SpinLock::new(Tlsf::uninitialized()),
        }
    }

    /// Must be called exactly once, before any allocation, with a `'static`
    /// region this allocator will own for the remainder of the kernel's
    /// lifetime.
    ///
    /// # Safety
    /// `pool` must not be accessed by anyone else for as long as this
    /// allocator is in use.
    pub unsafe fn init(&self, pool: &'static mut [u8]) -> Result<(), AllocError> {
        log::info!(
            "tlsf: initializing kernel heap ({} bytes at {:p})",
            pool.len(),
            pool.as_ptr()
        );
        self.inner.lock().init(pool)
    }

    pub fn get_stats(&self) -> Stats {
        self.inner.lock().get_stats()
    }

    pub fn get_free_size(&self) -> usize {
        self.inner.lock().get_free_size()
    }

    pub fn get_fragment_count(&self) -> usize {
        self.inner.lock().get_fragment_count()
    }

    pub fn check_integrity(&self) -> Result<(), super::tlsf::IntegrityError> {
        self.inner.lock().check_integrity()
    }

    pub fn is_heap_pointer(&self, p: *const u8) -> bool {
        self.inner.lock().is_heap_pointer(p)
    }

    /// Raw allocation, bypassing `Layout` for callers (task stacks, IPC
    /// ring buffers) that just want `n` bytes at the platform alignment.
    pub fn malloc(&self, n: usize) -> Option<*mut u8> {
        self.inner.lock().malloc(n)
    }

    /// # Safety
    /// `p` must be `None`-or-null or a pointer previously returned by
    /// `malloc`/`realloc` on this same allocator, not yet freed.
    pub unsafe fn free(&self, p: *mut u8) {
        unsafe { self.inner.lock().free(p) };
    }

    /// # Safety
    /// Same requirements as [`Tlsf::realloc`].
    pub unsafe fn realloc(&self, p: *mut u8, n: usize) -> Option<*mut u8> {
        unsafe { self.inner.lock().realloc(p, n) }
    }
}

unsafe impl GlobalAlloc for GlobalTlsf {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // TLSF's own header overhead already enforces an alignment of at
        // least `PLATFORM_STACK_ALIGNMENT`; callers asking for a coarser
        // alignment than that are not supported (none of this kernel's
        // allocations need more than pointer alignment).
        match self.inner.lock().malloc(layout.size()) {
            Some(p) => p,
            None => {
                log::error!("tlsf: out of memory allocating {} bytes", layout.size());
                core::ptr::null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.inner.lock().free(ptr) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        match unsafe { self.inner.lock().realloc(ptr, new_size) } {
            Some(p) => p,
            None => core::ptr::null_mut(),
        }
    }
}

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: GlobalTlsf = GlobalTlsf::empty();

#[cfg(not(test))]
pub fn allocator() -> &'static GlobalTlsf {
    &ALLOCATOR
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
    crate::platform::panic();
    panic!("kernel heap allocation failed: {:?}", layout);
}
