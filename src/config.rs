//! Compile-time tunables (§6 of the design: "Tunables").
//!
//! These mirror the small `pub const` declarations the teacher scatters near
//! their point of use (e.g. `THREAD_STACK_SIZE`, `MAX_THREADS` in
//! `scheduler/mod.rs`); they're centralized here because the allocator,
//! scheduler, and every IPC primitive in this crate share them.

/// Maximum number of tasks the task table can hold at once (including idle).
///
/// Shrunk under `cfg(test)` so hosted unit tests exercise the same table/heap
/// logic without paying for production-sized arrays.
#[cfg(not(test))]
pub const MAX_TASKS: usize = 64;
#[cfg(test)]
pub const MAX_TASKS: usize = 8;

/// Maximum number of CPUs this build schedules across.
///
/// Kept at 1 even under test: both `Arch` ports' `cpu_id()` are hardcoded to
/// `0` (a single-core reference target, per `arch/x86_64`'s own doc
/// comment), so a larger value here would only strand tasks on a CPU slot
/// `this_cpu()` can never observe.
pub const MAX_CPUS: usize = 1;

/// Maximum number of live software timers (§ "Software timers").
pub const MAX_TIMERS: usize = 32;

/// Ticks of runtime per unit of weight in a replenished time slice.
pub const BASE_SLICE_TICKS: u32 = 2;

/// Divisor-independent scale applied to `vruntime` accrual so that integer
/// division against small weights doesn't collapse distinct runtimes to the
/// same bucket.
pub const VRUNTIME_SCALER: u64 = 1000;

/// Sentinel word written at the low address of every task stack.
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

pub const STACK_MIN_SIZE_BYTES: usize = 1024;
pub const STACK_MAX_SIZE_BYTES: usize = 64 * 1024;

/// Required alignment of task stacks and of every allocator-returned pointer.
pub const PLATFORM_STACK_ALIGNMENT: usize = 8;

/// TLSF first-level index count (`size` is treated as having at most
/// `2^FL_INDEX_MAX` significant bits).
pub const FL_INDEX_MAX: usize = 32;

/// log2 of the number of second-level classes per first-level class.
pub const SL_INDEX_COUNT_LOG2: usize = 4;

/// How often (in ticks) the idle task sweeps the zombie list.
pub const GARBAGE_COLLECTION_TICKS: u64 = 50;

/// Illustrative weight mid-points: `IDLE < LOW < NORMAL < HIGH`.
pub const TASK_WEIGHT_IDLE: u8 = 1;
pub const TASK_WEIGHT_LOW: u8 = 20;
pub const TASK_WEIGHT_NORMAL: u8 = 50;
pub const TASK_WEIGHT_HIGH: u8 = 200;

/// Tunables used only by hosted unit tests. `MAX_TASKS`/`MAX_CPUS` above are
/// already shrunk directly; this module holds the handful of values that
/// have no sensible non-test counterpart (there is no production "test
/// heap").
#[cfg(test)]
pub mod test_overrides {
    /// Backing pool size for the `cfg(test)` heap in
    /// [`crate::alloc_tlsf::kernel_alloc`]. Large enough for a few dozen
    /// task stacks and queue buffers across a whole test binary run.
    pub const TEST_HEAP_BYTES: usize = 64 * 1024;
}
