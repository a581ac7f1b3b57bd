//! Architecture port (§4.1, §6 "Arch port").
//!
//! Exposes the handful of primitives the scheduler/allocator need without
//! knowing anything about scheduling: masked interrupts, memory barriers, an
//! atomic test-and-set, a yield request, and initial-stack-frame
//! construction for new tasks. Everything above this trait (scheduler,
//! allocator, IPC) is written against `Arch` rather than against a concrete
//! architecture, mirroring the teacher's split between `arch/x86_64` and the
//! rest of `cluu-kernel-rust`.
//!
//! The concrete x86_64 implementation lives in [`x86_64`]; hosted unit tests
//! use [`test_stub::TestArch`] instead so the scheduler/IPC core can run
//! under `cargo test` without a booted target.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(test)]
pub mod test_stub;

/// An opaque interrupt-mask token returned by [`Arch::irq_lock`].
///
/// Callers must not interpret the value; they only pass it back to
/// [`Arch::irq_unlock`]. `irq_lock`/`irq_unlock` pairs nest: unlocking
/// restores exactly the mask that was active before the matching lock.
pub type IrqMask = u64;

/// The architecture port contract (§4.1).
///
/// Implementations must make `irq_lock`/`irq_unlock` safe to nest to
/// arbitrary depth and must guarantee that, once `request_yield` returns,
/// a context switch is eventually delivered (on x86_64: a pending `int
/// 0x81` taken as soon as interrupts are next unmasked).
pub trait Arch {
    /// Mask interrupts (at or above kernel critical-section priority) and
    /// return a token describing the prior mask state.
    fn irq_lock(&self) -> IrqMask;

    /// Restore the mask state captured by a matching [`Arch::irq_lock`].
    fn irq_unlock(&self, mask: IrqMask);

    /// Mask interrupts up to (but not including) `priority`, for the rare
    /// caller that needs a narrower critical section than the kernel's
    /// default. Returns a token for [`Arch::irq_unlock`].
    fn irq_lock_priority(&self, priority: u8) -> IrqMask;

    /// Data memory barrier.
    fn dmb(&self);
    /// Data synchronization barrier.
    fn dsb(&self);
    /// Instruction synchronization barrier.
    fn isb(&self);

    /// Wait for interrupt (power-saving halt); used by the idle task.
    fn wfi(&self);
    /// Architectural no-op, used to pad timing-sensitive loops in tests.
    fn nop(&self);

    /// Atomically swap `*cell` to `1` and return the previous value.
    fn test_and_set(&self, cell: &core::sync::atomic::AtomicU32) -> u32;

    /// The index of the CPU executing this call, in `0..MAX_CPUS`.
    fn cpu_id(&self) -> u32;

    /// Request that the scheduler be re-entered as soon as possible
    /// (raises a supervisor-level software interrupt on x86_64). Does not
    /// itself perform the switch; the caller observes no side effects
    /// beyond an eventually delivered switch.
    fn request_yield(&self);

    /// Build the initial stack frame for a new task so that, the first
    /// time it is switched to, control lands at `entry(arg)` and a return
    /// from `entry` lands in `exit_trampoline`.
    ///
    /// `stack_top` is the exclusive upper bound of the stack region
    /// (stacks grow down). Returns the saved stack pointer to store in the
    /// task's control block.
    ///
    /// # Safety
    /// `stack_top` must be `PLATFORM_STACK_ALIGNMENT`-aligned and the
    /// region `[stack_top - frame_size, stack_top)` must be valid,
    /// writable, task-owned memory.
    unsafe fn initialize_stack(
        &self,
        stack_top: *mut u8,
        entry: extern "C" fn(usize),
        arg: usize,
        exit_trampoline: extern "C" fn() -> !,
    ) -> usize;

    /// Reset the platform (used by `platform_panic`'s last resort and by
    /// tests exercising the panic path indirectly).
    fn reset(&self) -> !;
}

/// The active architecture port for this build: the concrete x86_64 port
/// outside tests, [`test_stub::TestArch`] under `cargo test`.
#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn current() -> &'static dyn Arch {
    &x86_64::ARCH
}

#[cfg(test)]
pub fn current() -> &'static dyn Arch {
    &test_stub::TEST_ARCH
}
