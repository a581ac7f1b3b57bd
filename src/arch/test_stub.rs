//! Hosted `Arch` stub used by `#[cfg(test)]` unit tests.
//!
//! Mirrors the teacher's split between target-specific code
//! (`arch/x86_64`) and portable kernel logic: the scheduler/allocator/IPC
//! core never references `x86_64` directly, so under `cargo test` it runs
//! against this single-threaded, no-op-barrier stand-in instead. There is
//! no real interrupt controller here, so `irq_lock`/`irq_unlock` only track
//! nesting depth and `request_yield` just flips a flag tests can observe.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use super::Arch;

pub struct TestArch {
    depth: Cell<u64>,
    yield_requested: Cell<bool>,
}

impl TestArch {
    pub const fn new() -> Self {
        Self {
            depth: Cell::new(0),
            yield_requested: Cell::new(false),
        }
    }

    /// Test-only accessor: was [`Arch::request_yield`] called since the
    /// last check?
    pub fn take_yield_requested(&self) -> bool {
        self.yield_requested.replace(false)
    }
}

impl Default for TestArch {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: hosted unit tests are single-threaded; `Cell` is fine here.
unsafe impl Sync for TestArch {}

pub static TEST_ARCH: TestArch = TestArch::new();

impl Arch for TestArch {
    fn irq_lock(&self) -> u64 {
        let prior = self.depth.get();
        self.depth.set(prior + 1);
        prior
    }

    fn irq_unlock(&self, mask: u64) {
        self.depth.set(mask);
    }

    fn irq_lock_priority(&self, _priority: u8) -> u64 {
        self.irq_lock()
    }

    fn dmb(&self) {}
    fn dsb(&self) {}
    fn isb(&self) {}
    fn wfi(&self) {}
    fn nop(&self) {}

    fn test_and_set(&self, cell: &AtomicU32) -> u32 {
        cell.swap(1, Ordering::SeqCst)
    }

    fn cpu_id(&self) -> u32 {
        0
    }

    fn request_yield(&self) {
        self.yield_requested.set(true);
    }

    unsafe fn initialize_stack(
        &self,
        stack_top: *mut u8,
        _entry: extern "C" fn(usize),
        _arg: usize,
        _exit_trampoline: extern "C" fn() -> !,
    ) -> usize {
        // Hosted tests never actually switch to a task's stack (there is
        // no real context switch without the booted target), so the
        // "saved stack pointer" is just a recognisable, alignment-correct
        // value derived from the top of the region.
        stack_top as usize
    }

    fn reset(&self) -> ! {
        panic!("TestArch::reset() called");
    }
}
