//! Raw allocation entry points for kernel-internal consumers (task stacks,
//! queue ring buffers, control blocks) that want `n` bytes directly rather
//! than going through `Layout`/the `alloc` crate.
//!
//! Outside tests these delegate to the real `#[global_allocator]` instance
//! in [`super::global`]. Under `cfg(test)` there is no `#[global_allocator]`
//! wired (the harness owns its own allocator), so this module instead backs
//! onto a dedicated static pool sized by
//! [`crate::config::test_overrides::TEST_HEAP_BYTES`], lazily initialized on
//! first use. Every hosted unit test that creates tasks or queues therefore
//! shares one heap for the lifetime of the test binary; this is fine since
//! allocations are never expected to exhaust it and `reset_for_test` is
//! available for tests that care about exact fragmentation counts.

use super::global::GlobalTlsf;
use super::tlsf::{IntegrityError, Stats};

#[cfg(not(test))]
pub fn malloc(n: usize) -> Option<*mut u8> {
    super::global::allocator().malloc(n)
}

#[cfg(not(test))]
pub unsafe fn free(p: *mut u8) {
    unsafe { super::global::allocator().free(p) };
}

#[cfg(not(test))]
pub unsafe fn realloc(p: *mut u8, n: usize) -> Option<*mut u8> {
    unsafe { super::global::allocator().realloc(p, n) }
}

#[cfg(not(test))]
pub fn get_stats() -> Stats {
    super::global::allocator().get_stats()
}

#[cfg(not(test))]
pub fn get_free_size() -> usize {
    super::global::allocator().get_free_size()
}

#[cfg(not(test))]
pub fn get_fragment_count() -> usize {
    super::global::allocator().get_fragment_count()
}

#[cfg(not(test))]
pub fn check_integrity() -> Result<(), IntegrityError> {
    super::global::allocator().check_integrity()
}

#[cfg(not(test))]
pub fn is_heap_pointer(p: *const u8) -> bool {
    super::global::allocator().is_heap_pointer(p)
}

#[cfg(test)]
static TEST_ALLOCATOR: GlobalTlsf = GlobalTlsf::empty();

#[cfg(test)]
static TEST_HEAP_READY: spin::Once<()> = spin::Once::new();

#[cfg(test)]
fn ensure_test_heap() {
    TEST_HEAP_READY.call_once(|| {
        use crate::config::test_overrides::TEST_HEAP_BYTES;
        // Leaked once per test binary; the harness never tears this down.
        let pool: &'static mut [u8] = alloc_test_pool(TEST_HEAP_BYTES);
        unsafe {
            TEST_ALLOCATOR
                .init(pool)
                .expect("test heap pool too small");
        }
    });
}

#[cfg(test)]
fn alloc_test_pool(n: usize) -> &'static mut [u8] {
    let v = std::vec![0u8; n];
    std::boxed::Box::leak(v.into_boxed_slice())
}

#[cfg(test)]
pub fn malloc(n: usize) -> Option<*mut u8> {
    ensure_test_heap();
    TEST_ALLOCATOR.malloc(n)
}

#[cfg(test)]
pub unsafe fn free(p: *mut u8) {
    ensure_test_heap();
    unsafe { TEST_ALLOCATOR.free(p) };
}

#[cfg(test)]
pub unsafe fn realloc(p: *mut u8, n: usize) -> Option<*mut u8> {
    ensure_test_heap();
    unsafe { TEST_ALLOCATOR.realloc(p, n) }
}

#[cfg(test)]
pub fn get_stats() -> Stats {
    ensure_test_heap();
    TEST_ALLOCATOR.get_stats()
}

#[cfg(test)]
pub fn get_free_size() -> usize {
    ensure_test_heap();
    TEST_ALLOCATOR.get_free_size()
}

#[cfg(test)]
pub fn get_fragment_count() -> usize {
    ensure_test_heap();
    TEST_ALLOCATOR.get_fragment_count()
}

#[cfg(test)]
pub fn check_integrity() -> Result<(), IntegrityError> {
    ensure_test_heap();
    TEST_ALLOCATOR.check_integrity()
}

#[cfg(test)]
pub fn is_heap_pointer(p: *const u8) -> bool {
    ensure_test_heap();
    TEST_ALLOCATOR.is_heap_pointer(p)
}
