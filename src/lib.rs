//! `quanta-kernel`: a small preemptive real-time kernel for single-address-space
//! embedded targets (see `SPEC_FULL.md` at the workspace root).
//!
//! The crate is `no_std` outside `cargo test`: the scheduler, TLSF allocator,
//! and IPC primitives (queue/mutex/semaphore/event group/timer) are written
//! against the [`arch::Arch`]/[`platform::Platform`] trait boundary so that
//! this portable core never references a concrete architecture, matching the
//! teacher codebase's (`cluu-kernel-rust`) split between `arch/x86_64` and the
//! rest of the kernel. Under `cargo test` the traits are backed by hosted
//! stubs (`arch::test_stub`, `platform::test_stub`) instead of a booted
//! target, so the scheduler/allocator/IPC core can be unit tested directly.
//!
//! The concrete x86_64 binary port (boot trampoline, GDT/IDT, PIC, 16550
//! serial) lives in `src/main.rs` and `arch::x86_64`/`platform::x86_64_platform`,
//! gated behind the `bin` feature.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), feature(alloc_error_handler))]

pub mod alloc_tlsf;
pub mod arch;
pub mod config;
pub mod logger;
pub mod platform;
pub mod sched;
#[cfg(feature = "bin")]
pub mod selftest;
pub mod sync;

pub use sched::task::TaskId;

/// Brings up every kernel subsystem in dependency order: the TLSF heap (must
/// come first — task creation and IPC control blocks allocate from it), then
/// the scheduler's task table and idle task(s), then the software-timer
/// daemon. Does not start the scheduler (`platform::start_scheduler`) or spawn
/// any application tasks; the caller (`main.rs`'s `kmain`, or a hosted test)
/// does that afterward.
///
/// # Safety
/// `heap_pool` must be a `'static` region no one else accesses for the
/// remainder of the kernel's lifetime (see [`alloc_tlsf::global::GlobalTlsf::init`]).
#[cfg(not(test))]
pub unsafe fn init(heap_pool: &'static mut [u8]) {
    unsafe {
        alloc_tlsf::global::allocator()
            .init(heap_pool)
            .expect("heap pool too small to initialize TLSF allocator");
    }
    sched::scheduler_init();
    sync::TimerService::start(config::TASK_WEIGHT_LOW).expect("failed to start timer daemon");
    log::info!("quanta-kernel: all subsystems initialized");
}
