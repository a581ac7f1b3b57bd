//! Task control block and the small enums/flags attached to it (§3 "Task").

use bitflags::bitflags;

/// A 16-bit task identity from the process-wide id bitmap. `TaskId(0)` means
/// "no task" and is never issued to a live task (§3 invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub u16);

impl TaskId {
    pub const NONE: TaskId = TaskId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unused,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
}

bitflags! {
    /// A task's outstanding event-group wait request (§3 "Event-wait",
    /// §4.7). Only meaningful while `state == Blocked` on an event group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventWaitFlags: u8 {
        /// Wake only once every requested bit is set (ALL); otherwise ANY.
        const MATCH_ALL = 1 << 0;
        /// Clear the requested bits from the group on a successful wake.
        const CLEAR_ON_EXIT = 1 << 1;
        /// Set by `event_group::set_bits` once this waiter's condition is
        /// met, so the waking task can distinguish "woken by event" from
        /// "woken by timeout".
        const SATISFIED = 1 << 2;
    }
}

/// One slot in the scheduler's fixed-size task table (§3 "Task").
///
/// Every field that threads a task onto some list is a plain `Option`
/// handle rather than a pointer, per the allocator's "indices instead of
/// raw pointers" design note extended here to the task table.
#[derive(Clone, Copy)]
pub struct Task {
    /// Currently issued id, or `TaskId::NONE` if this slot is `Unused` or a
    /// not-yet-reaped `Zombie` (ids are released at zombie time, §4.3).
    pub id: TaskId,
    pub state: TaskState,
    pub cpu: u8,
    pub is_idle: bool,

    pub stack_base: usize,
    pub stack_size: usize,
    /// `false` for `task_create_static`'s caller-owned buffers: the
    /// scheduler does not free these at reap.
    pub stack_owned: bool,
    /// Saved stack pointer, restored by the arch port on context switch.
    pub sp: usize,

    pub base_weight: u8,
    pub weight: u8,
    pub vruntime: u64,
    pub time_slice: u32,
    /// Back-pointer into the per-CPU ready min-heap's backing array, or
    /// `-1` if this task is not currently in any ready heap.
    pub heap_index: i32,

    /// Absolute tick at which a `Sleeping` task should wake; `0` means "not
    /// sleeping".
    pub sleep_until_tick: u64,

    /// Threads this slot onto the free list, a CPU's sleep list, or the
    /// global zombie list (never more than one at a time, §3 invariant 1).
    /// Indexes the task table directly since these lists are an internal
    /// scheduler concept that never crosses into `ipc::*`.
    pub(super) sched_next: Option<usize>,

    pub notify_value: u32,
    pub notify_pending: bool,

    /// Threads this task onto an IPC object's waiter list. Keyed by
    /// `TaskId` (not slot) because `ipc::*` only ever sees ids.
    pub wait_next: Option<TaskId>,

    pub event_mask: u32,
    pub event_flags: EventWaitFlags,
    pub event_result: u32,

    /// Set by `sync::semaphore::Semaphore::signal`'s direct handoff (§4.6:
    /// "handoff: count stays at zero"). A waiter woken this way must not
    /// re-check `count` on its retry loop's next iteration — there may be
    /// none to see — so it consumes this flag instead.
    pub sem_handoff: bool,
}

impl Task {
    pub const fn unused() -> Self {
        Self {
            id: TaskId::NONE,
            state: TaskState::Unused,
            cpu: 0,
            is_idle: false,
            stack_base: 0,
            stack_size: 0,
            stack_owned: false,
            sp: 0,
            base_weight: 0,
            weight: 0,
            vruntime: 0,
            time_slice: 0,
            heap_index: -1,
            sleep_until_tick: 0,
            sched_next: None,
            notify_value: 0,
            notify_pending: false,
            wait_next: None,
            event_mask: 0,
            event_flags: EventWaitFlags::empty(),
            event_result: 0,
            sem_handoff: false,
        }
    }

    pub fn in_ready_heap(&self) -> bool {
        self.heap_index >= 0
    }
}

/// Signed, wrap-safe `a < b` over the 64-bit vruntime domain (§4.3).
pub fn vruntime_less(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}
