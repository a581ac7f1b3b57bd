//! Weighted-fair preemptive scheduler (original spec §3/§4.3/§5).
//!
//! A single global [`SpinLock<Scheduler>`] replaces the source design's
//! split global-lock-plus-per-CPU-lock scheme (§5): with `MAX_CPUS == 1`
//! fixed by this reference port (see `config::MAX_CPUS`'s doc comment) a
//! second lock tier buys no extra concurrency and only adds an ordering
//! rule to get wrong, so task-table and per-CPU ready/sleep-list mutation
//! share one critical section. Recorded as a deliberate simplification in
//! DESIGN.md.
//!
//! `schedule_from_interrupt`/`scheduler_tick` are the two entry points the
//! arch layer (`arch::x86_64::context`) and the platform layer
//! (`platform::test_stub`) already call by these exact names and
//! signatures; everything else in this module exists to support them.

pub mod heap;
pub mod task;
pub mod wait_list;

use core::sync::atomic::{AtomicU64, Ordering};

use crate::alloc_tlsf::kernel_alloc;
use crate::config;
use crate::platform;
use crate::sync::SpinLock;

use heap::ReadyHeap;
use task::{vruntime_less, EventWaitFlags, Task, TaskId, TaskState};
use wait_list::WaitList;

/// Errors internal to the scheduler (SPEC_FULL "Ambient additions"); public
/// entry points collapse these to the original spec's `Option`/negative-code
/// contract, logging the richer reason first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    NoFreeSlot,
    NoFreeId,
    OutOfMemory,
    InvalidTask,
    IdleTaskDeletion,
}

#[derive(Clone, Copy)]
struct PerCpu {
    ready: ReadyHeap,
    /// Head of a singly linked list through `tasks[].sched_next`, sorted
    /// ascending by `sleep_until_tick`.
    sleep_head: Option<usize>,
    current: Option<usize>,
    idle_slot: usize,
}

impl PerCpu {
    const fn empty() -> Self {
        Self {
            ready: ReadyHeap::new(),
            sleep_head: None,
            current: None,
            idle_slot: usize::MAX,
        }
    }
}

pub struct Scheduler {
    tasks: [Task; config::MAX_TASKS],
    per_cpu: [PerCpu; config::MAX_CPUS],
    free_head: Option<usize>,
    zombie_head: Option<usize>,
    /// Bit `i` set ⇔ id `i + 1` is in use. `MAX_TASKS <= 64` always, so one
    /// word suffices (§9 note (iii): small `MAX_TASKS` is assumed
    /// throughout).
    id_bitmap: u64,
    task_count: usize,
    next_cpu_rr: u8,
    enabled: bool,
    ticks_since_gc: u64,
}

impl Scheduler {
    const fn empty() -> Self {
        Self {
            tasks: [Task::unused(); config::MAX_TASKS],
            per_cpu: [PerCpu::empty(); config::MAX_CPUS],
            free_head: None,
            zombie_head: None,
            id_bitmap: 0,
            task_count: 0,
            next_cpu_rr: 0,
            enabled: false,
            ticks_since_gc: 0,
        }
    }
}

static KERNEL: SpinLock<Scheduler> = SpinLock::new(Scheduler::empty());

/// Monotonically increasing counter of completed `schedule_from_interrupt`
/// switches, for `sched_stats()`; not used by any scheduling decision.
static CONTEXT_SWITCHES: AtomicU64 = AtomicU64::new(0);

fn this_cpu() -> usize {
    crate::arch::current().cpu_id() as usize
}

fn find_slot_by_id(sched: &Scheduler, id: TaskId) -> Option<usize> {
    if id.is_none() {
        return None;
    }
    sched.tasks.iter().position(|t| t.id == id)
}

fn alloc_id_locked(sched: &mut Scheduler) -> Option<u16> {
    for i in 0..config::MAX_TASKS {
        if sched.id_bitmap & (1u64 << i) == 0 {
            sched.id_bitmap |= 1u64 << i;
            return Some((i + 1) as u16);
        }
    }
    None
}

fn mark_id_used_locked(sched: &mut Scheduler, id: u16) {
    sched.id_bitmap |= 1u64 << (id - 1);
}

fn free_id_locked(sched: &mut Scheduler, id: TaskId) {
    if id.is_some() {
        sched.id_bitmap &= !(1u64 << (id.0 - 1));
    }
}

/// §4.3 "clamped upward to the current min of the heap (or the current
/// runner's)". Resolves Open Question (i) in favor of strict-less-than,
/// matching [`vruntime_less`]'s own definition; ties clamp to the same
/// value either way, so the choice is behaviorally silent (see DESIGN.md).
fn clamp_vruntime_on_wake_locked(sched: &mut Scheduler, cpu: usize, slot: usize) {
    let floor = sched.per_cpu[cpu]
        .ready
        .peek_min_vruntime(&sched.tasks)
        .or_else(|| sched.per_cpu[cpu].current.map(|c| sched.tasks[c].vruntime));
    if let Some(floor) = floor {
        if vruntime_less(sched.tasks[slot].vruntime, floor) {
            sched.tasks[slot].vruntime = floor;
        }
    }
}

fn insert_sleep_sorted_locked(sched: &mut Scheduler, cpu: usize, slot: usize) {
    let wake = sched.tasks[slot].sleep_until_tick;
    let mut prev: Option<usize> = None;
    let mut cur = sched.per_cpu[cpu].sleep_head;
    while let Some(cur_slot) = cur {
        if sched.tasks[cur_slot].sleep_until_tick > wake {
            break;
        }
        prev = Some(cur_slot);
        cur = sched.tasks[cur_slot].sched_next;
    }
    sched.tasks[slot].sched_next = cur;
    match prev {
        None => sched.per_cpu[cpu].sleep_head = Some(slot),
        Some(prev_slot) => sched.tasks[prev_slot].sched_next = Some(slot),
    }
}

/// Removes `slot` from `cpu`'s sleep list if present. O(k) walk, matching
/// §4.3's own characterization of the sleep list.
fn remove_from_sleep_locked(sched: &mut Scheduler, cpu: usize, slot: usize) -> bool {
    let mut prev: Option<usize> = None;
    let mut cur = sched.per_cpu[cpu].sleep_head;
    while let Some(cur_slot) = cur {
        if cur_slot == slot {
            let next = sched.tasks[cur_slot].sched_next;
            match prev {
                None => sched.per_cpu[cpu].sleep_head = next,
                Some(prev_slot) => sched.tasks[prev_slot].sched_next = next,
            }
            sched.tasks[cur_slot].sched_next = None;
            return true;
        }
        prev = Some(cur_slot);
        cur = sched.tasks[cur_slot].sched_next;
    }
    false
}

/// Peels every sleeper whose wake tick has arrived, re-enqueuing each as
/// `READY` with a clamped `vruntime` (§4.3 tick handler step 1).
fn wake_expired_sleepers_locked(sched: &mut Scheduler, cpu: usize, now: u64) {
    while let Some(slot) = sched.per_cpu[cpu].sleep_head {
        if sched.tasks[slot].sleep_until_tick > now {
            break;
        }
        sched.per_cpu[cpu].sleep_head = sched.tasks[slot].sched_next;
        sched.tasks[slot].sched_next = None;
        sched.tasks[slot].sleep_until_tick = 0;
        ready_locked(sched, cpu, slot);
    }
}

/// Transitions `slot` to `READY`, clamping its `vruntime` and pushing it
/// into `cpu`'s ready heap. Used by every wake path (sleep expiry, notify,
/// IPC wakeup).
fn ready_locked(sched: &mut Scheduler, cpu: usize, slot: usize) {
    clamp_vruntime_on_wake_locked(sched, cpu, slot);
    sched.tasks[slot].state = TaskState::Ready;
    sched.per_cpu[cpu].ready.push(&mut sched.tasks, slot);
}

/// Wakes a `BLOCKED` or `SLEEPING` task by task table slot. Detaches it
/// from the sleep list first if needed; callers already responsible for
/// IPC-object wait-list membership must detach it from that list
/// themselves (via [`wait_pop_front`]/[`wait_remove`]) before calling this.
fn unblock_slot_locked(sched: &mut Scheduler, slot: usize) {
    let cpu = sched.tasks[slot].cpu as usize;
    match sched.tasks[slot].state {
        TaskState::Sleeping => {
            remove_from_sleep_locked(sched, cpu, slot);
            ready_locked(sched, cpu, slot);
        }
        TaskState::Blocked => {
            ready_locked(sched, cpu, slot);
        }
        _ => {}
    }
}

// --- Public task lifecycle -------------------------------------------------

enum StackSource {
    Owned(usize),
    Provided(&'static mut [u8]),
}

fn allocate_stack_with_gc_retry(size: usize) -> Option<*mut u8> {
    if let Some(p) = kernel_alloc::malloc(size) {
        return Some(p);
    }
    {
        let mut sched = KERNEL.lock();
        gc_sweep_locked(&mut sched);
    }
    kernel_alloc::malloc(size)
}

extern "C" fn task_exit_trampoline() -> ! {
    task_exit()
}

extern "C" fn idle_entry(_arg: usize) {
    loop {
        {
            let mut sched = KERNEL.lock();
            sched.ticks_since_gc += 1;
            if sched.ticks_since_gc >= config::GARBAGE_COLLECTION_TICKS {
                sched.ticks_since_gc = 0;
                gc_sweep_locked(&mut sched);
            }
        }
        platform::cpu_idle();
    }
}

fn create_task_internal(
    entry: extern "C" fn(usize),
    arg: usize,
    stack: StackSource,
    weight: u8,
    forced_id: Option<u16>,
    is_idle: bool,
    forced_cpu: Option<u8>,
) -> Result<TaskId, SchedulerError> {
    let weight = weight.max(1);

    let (stack_base, stack_size, stack_owned) = match stack {
        StackSource::Owned(requested) => {
            let size = requested.clamp(config::STACK_MIN_SIZE_BYTES, config::STACK_MAX_SIZE_BYTES);
            let ptr = allocate_stack_with_gc_retry(size).ok_or(SchedulerError::OutOfMemory)?;
            (ptr as usize, size, true)
        }
        StackSource::Provided(buf) => {
            if buf.len() < config::STACK_MIN_SIZE_BYTES {
                return Err(SchedulerError::OutOfMemory);
            }
            let base = buf.as_mut_ptr() as usize;
            let size = buf.len();
            (base, size, false)
        }
    };

    // SAFETY: `stack_base` is a freshly (or caller-) owned, writable region
    // of at least `stack_size` bytes; the canary word fits within it.
    unsafe { core::ptr::write_volatile(stack_base as *mut u32, config::STACK_CANARY) };

    let stack_top = (stack_base + stack_size) as *mut u8;
    // SAFETY: `stack_top` is `PLATFORM_STACK_ALIGNMENT`-aligned (the
    // allocator and `Provided` buffers are both required to be) and
    // `[stack_top - frame_size, stack_top)` lies within the region just
    // established above.
    let sp = unsafe { crate::arch::current().initialize_stack(stack_top, entry, arg, task_exit_trampoline) };

    let mut sched = KERNEL.lock();

    let slot = match sched.free_head {
        Some(s) => s,
        None => {
            gc_sweep_locked(&mut sched);
            match sched.free_head {
                Some(s) => s,
                None => {
                    drop(sched);
                    if stack_owned {
                        unsafe { kernel_alloc::free(stack_base as *mut u8) };
                    }
                    return Err(SchedulerError::NoFreeSlot);
                }
            }
        }
    };
    sched.free_head = sched.tasks[slot].sched_next;
    sched.tasks[slot].sched_next = None;

    let id = match forced_id {
        Some(v) => {
            mark_id_used_locked(&mut sched, v);
            v
        }
        None => match alloc_id_locked(&mut sched) {
            Some(v) => v,
            None => {
                sched.tasks[slot].sched_next = sched.free_head;
                sched.free_head = Some(slot);
                drop(sched);
                if stack_owned {
                    unsafe { kernel_alloc::free(stack_base as *mut u8) };
                }
                return Err(SchedulerError::NoFreeId);
            }
        },
    };

    let cpu = forced_cpu.unwrap_or_else(|| {
        let c = sched.next_cpu_rr;
        sched.next_cpu_rr = (sched.next_cpu_rr + 1) % (config::MAX_CPUS as u8);
        c
    });

    let vruntime = if is_idle {
        0
    } else {
        sched.per_cpu[cpu as usize]
            .ready
            .peek_min_vruntime(&sched.tasks)
            .or_else(|| sched.per_cpu[cpu as usize].current.map(|c| sched.tasks[c].vruntime))
            .unwrap_or(0)
    };

    sched.tasks[slot] = Task {
        id: TaskId(id),
        state: TaskState::Ready,
        cpu,
        is_idle,
        stack_base,
        stack_size,
        stack_owned,
        sp,
        base_weight: weight,
        weight,
        vruntime,
        time_slice: weight as u32 * config::BASE_SLICE_TICKS,
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
    };

    if !is_idle {
        sched.per_cpu[cpu as usize].ready.push(&mut sched.tasks, slot);
    }
    sched.task_count += 1;

    log::trace!("sched: created task id={} cpu={} weight={}", id, cpu, weight);

    Ok(TaskId(id))
}

/// Bring up the scheduler: resets the task table, then creates one idle
/// task per CPU (forced ids counting down from `MAX_TASKS`, so the first
/// ordinary `task_create` still yields id 1, §8 Testable Property 6).
/// Idempotent.
pub fn scheduler_init() {
    {
        let mut sched = KERNEL.lock();
        if sched.enabled {
            return;
        }
        for i in 0..config::MAX_TASKS {
            sched.tasks[i] = Task::unused();
            sched.tasks[i].sched_next = if i + 1 < config::MAX_TASKS {
                Some(i + 1)
            } else {
                None
            };
        }
        sched.free_head = if config::MAX_TASKS > 0 { Some(0) } else { None };
        sched.zombie_head = None;
        sched.id_bitmap = 0;
        sched.task_count = 0;
        sched.next_cpu_rr = 0;
        sched.ticks_since_gc = 0;
        for cpu in 0..config::MAX_CPUS {
            sched.per_cpu[cpu] = PerCpu::empty();
        }
    }

    for cpu in 0..config::MAX_CPUS {
        let forced_id = (config::MAX_TASKS - cpu) as u16;
        let id = create_task_internal(
            idle_entry,
            cpu,
            StackSource::Owned(config::STACK_MIN_SIZE_BYTES),
            config::TASK_WEIGHT_IDLE,
            Some(forced_id),
            true,
            Some(cpu as u8),
        )
        .expect("failed to create idle task");

        let mut sched = KERNEL.lock();
        let slot = find_slot_by_id(&sched, id).expect("idle task just created");
        sched.per_cpu[cpu].idle_slot = slot;
        sched.per_cpu[cpu].current = Some(slot);
        sched.tasks[slot].state = TaskState::Running;
    }

    let mut sched = KERNEL.lock();
    sched.enabled = true;
    log::info!(
        "sched: initialized ({} task slots, {} cpu(s))",
        config::MAX_TASKS,
        config::MAX_CPUS
    );
}

pub fn task_create(entry: extern "C" fn(usize), arg: usize, stack_size: usize, weight: u8) -> Option<TaskId> {
    match create_task_internal(entry, arg, StackSource::Owned(stack_size), weight, None, false, None) {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("sched: task_create failed: {:?}", e);
            None
        }
    }
}

/// Caller-owned stack buffer variant (§4.3 "static-stack variant"); the
/// scheduler never frees `stack`.
pub fn task_create_static(
    entry: extern "C" fn(usize),
    arg: usize,
    stack: &'static mut [u8],
    weight: u8,
) -> Option<TaskId> {
    match create_task_internal(entry, arg, StackSource::Provided(stack), weight, None, false, None) {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("sched: task_create_static failed: {:?}", e);
            None
        }
    }
}

/// Deletes a task by id. Deleting the idle task is rejected. Deleting the
/// calling task is routed to [`task_exit`] (§7), which never returns.
pub fn task_delete(id: TaskId) -> Result<(), SchedulerError> {
    let (is_idle, is_self) = {
        let sched = KERNEL.lock();
        let cpu = this_cpu();
        let Some(slot) = find_slot_by_id(&sched, id) else {
            return Err(SchedulerError::InvalidTask);
        };
        let is_self = sched.per_cpu[cpu].current == Some(slot);
        (sched.tasks[slot].is_idle, is_self)
    };
    if is_idle {
        return Err(SchedulerError::IdleTaskDeletion);
    }
    if is_self {
        task_exit();
    }

    let mut sched = KERNEL.lock();
    let slot = find_slot_by_id(&sched, id).ok_or(SchedulerError::InvalidTask)?;
    let cpu = sched.tasks[slot].cpu as usize;
    match sched.tasks[slot].state {
        TaskState::Ready => sched.per_cpu[cpu].ready.remove(&mut sched.tasks, slot),
        TaskState::Sleeping => {
            remove_from_sleep_locked(&mut sched, cpu, slot);
        }
        // A `Blocked` task is parked on some IPC object's wait list, which
        // this module has no handle on; §4.3 only specifies detaching from
        // the ready heap or sleep list, so a blocked-on-IPC victim is left
        // on that list (a known, literal-spec limitation; see DESIGN.md).
        _ => {}
    }

    free_id_locked(&mut sched, id);
    sched.tasks[slot].id = TaskId::NONE;
    sched.tasks[slot].state = TaskState::Zombie;
    sched.tasks[slot].sched_next = sched.zombie_head;
    sched.zombie_head = Some(slot);

    Ok(())
}

/// Terminates the calling task. Never returns: it marks itself `ZOMBIE` and
/// yields forever until the scheduler switches away from it for the last
/// time.
pub fn task_exit() -> ! {
    {
        let mut sched = KERNEL.lock();
        let cpu = this_cpu();
        if let Some(slot) = sched.per_cpu[cpu].current.take() {
            free_id_locked(&mut sched, sched.tasks[slot].id);
            sched.tasks[slot].id = TaskId::NONE;
            sched.tasks[slot].state = TaskState::Zombie;
            sched.tasks[slot].sched_next = sched.zombie_head;
            sched.zombie_head = Some(slot);
        }
    }
    loop {
        platform::yield_now();
    }
}

/// Puts the calling task to sleep for at least `ticks` ticks (§4.3
/// "Sleep").
pub fn task_sleep_ticks(ticks: u64) {
    {
        let mut sched = KERNEL.lock();
        let cpu = this_cpu();
        let slot = sched.per_cpu[cpu].current.expect("task_sleep_ticks with no current task");
        remove_from_sleep_locked(&mut sched, cpu, slot);
        let now = platform::get_ticks();
        sched.tasks[slot].sleep_until_tick = now + ticks.max(1);
        sched.tasks[slot].state = TaskState::Sleeping;
        insert_sleep_sorted_locked(&mut sched, cpu, slot);
    }
    platform::yield_now();
}

/// ORs `bits` into `id`'s notification accumulator and wakes it if blocked
/// or sleeping (§4.3 "Notification").
pub fn task_notify(id: TaskId, bits: u32) {
    let mut sched = KERNEL.lock();
    let Some(slot) = find_slot_by_id(&sched, id) else {
        return;
    };
    sched.tasks[slot].notify_value |= bits;
    sched.tasks[slot].notify_pending = true;
    unblock_slot_locked(&mut sched, slot);
}

/// Waits for a notification. Returns immediately if one is already pending;
/// otherwise blocks (optionally with a timeout) and returns whatever
/// accumulated by the time it resumes — `0` if woken by timeout rather than
/// by `task_notify` (§4.3 "Notification").
pub fn task_notify_wait(clear_on_exit: bool, timeout_ticks: Option<u64>) -> u32 {
    {
        let mut sched = KERNEL.lock();
        let cpu = this_cpu();
        let slot = sched.per_cpu[cpu].current.expect("task_notify_wait with no current task");
        if sched.tasks[slot].notify_pending {
            let v = sched.tasks[slot].notify_value;
            if clear_on_exit {
                sched.tasks[slot].notify_value = 0;
            }
            sched.tasks[slot].notify_pending = false;
            return v;
        }
        match timeout_ticks {
            Some(t) => {
                let now = platform::get_ticks();
                sched.tasks[slot].sleep_until_tick = now + t.max(1);
                sched.tasks[slot].state = TaskState::Sleeping;
                insert_sleep_sorted_locked(&mut sched, cpu, slot);
            }
            None => {
                sched.tasks[slot].state = TaskState::Blocked;
            }
        }
    }
    platform::yield_now();

    let mut sched = KERNEL.lock();
    let cpu = this_cpu();
    let slot = sched.per_cpu[cpu].current.expect("task_notify_wait with no current task");
    if sched.tasks[slot].notify_pending {
        let v = sched.tasks[slot].notify_value;
        if clear_on_exit {
            sched.tasks[slot].notify_value = 0;
        }
        sched.tasks[slot].notify_pending = false;
        v
    } else {
        0
    }
}

/// The calling task's id, or `TaskId::NONE` before `scheduler_init`/on an
/// unrecognized CPU.
pub fn current_task_id() -> TaskId {
    let sched = KERNEL.lock();
    let cpu = this_cpu();
    sched.per_cpu[cpu]
        .current
        .map(|s| sched.tasks[s].id)
        .unwrap_or(TaskId::NONE)
}

pub fn current_task_weight() -> u8 {
    let sched = KERNEL.lock();
    let cpu = this_cpu();
    sched.per_cpu[cpu].current.map(|s| sched.tasks[s].weight).unwrap_or(0)
}

/// The stack pointer `platform::start_scheduler` should resume into on the
/// given CPU, i.e. the frame `Arch::initialize_stack` built for whichever
/// task `scheduler_init` left as that CPU's `current` (initially its idle
/// task). Boot code calls this exactly once, after `scheduler_init` and
/// after spawning any application tasks, right before handing off control.
pub fn bootstrap_sp(cpu: usize) -> usize {
    let sched = KERNEL.lock();
    sched.per_cpu[cpu]
        .current
        .map(|s| sched.tasks[s].sp)
        .expect("bootstrap_sp called before scheduler_init")
}

// --- Accessors/mutators used by `crate::sync::*` IPC primitives ----------
//
// IPC objects hold their own `SpinLock`; they lock that first, mutate their
// `WaitList` and call into this module, and only then (still inside their
// own lock, per §5's lock-ordering note generalized to this crate's single
// scheduler lock) touch the scheduler. None of the functions below may be
// called while already holding `KERNEL`'s lock.

/// Enqueues the calling task onto `list` (FIFO tail) and marks it
/// `BLOCKED`. Returns the task's id so the caller can later identify it
/// (e.g. to implement a timeout via [`wait_remove`]).
///
/// Does **not** yield: the caller is still holding the IPC object's own
/// `SpinLock` guard at this point (that's the lock `list` lives behind),
/// and §5 forbids holding a lock across a yield. The caller must `drop`
/// that guard first and call `platform::yield_now()` itself afterward.
pub(crate) fn block_current_on(list: &mut WaitList) -> TaskId {
    let id = enqueue_current_on(list);
    set_current_blocked();
    id
}

/// Enqueues the calling task onto `list` (FIFO tail) without changing its
/// state, for callers (`sync::event_group`, `sync::timer`) that need the
/// task parked on an object's waiter list before deciding, separately,
/// whether to block indefinitely ([`task_block_current`]) or with a
/// timeout ([`block_current_with_timeout`]).
pub(crate) fn enqueue_current_on(list: &mut WaitList) -> TaskId {
    let mut sched = KERNEL.lock();
    let cpu = this_cpu();
    let slot = sched.per_cpu[cpu].current.expect("enqueue_current_on with no current task");
    let id = sched.tasks[slot].id;
    wait_enqueue_locked(&mut sched, list, id);
    id
}

/// Marks the calling task `BLOCKED`, without yielding (see
/// [`block_current_on`]'s doc for why the two are split).
fn set_current_blocked() {
    let mut sched = KERNEL.lock();
    let cpu = this_cpu();
    let slot = sched.per_cpu[cpu].current.expect("set_current_blocked with no current task");
    sched.tasks[slot].state = TaskState::Blocked;
}

/// Marks the calling task `BLOCKED` (indefinitely, no timeout) and yields
/// (§6 external interface `task_block_current`). The caller is
/// responsible for having already enqueued it onto whatever waiter list
/// will eventually wake it via [`wait_pop_front`]/[`wake_task`], and for
/// not holding any lock of its own across this call (it yields
/// immediately, unlike [`block_current_on`]).
pub fn task_block_current() {
    set_current_blocked();
    platform::yield_now();
}

/// Test-only: enqueues an arbitrary (not necessarily current) task onto
/// `list` and marks it `Blocked`, so `sync::*` unit tests can set up a
/// multi-waiter scenario without a real context switch putting each task
/// there in turn.
#[cfg(test)]
pub(crate) fn test_enqueue_blocked(list: &mut WaitList, id: TaskId) {
    let mut sched = KERNEL.lock();
    wait_enqueue_locked(&mut sched, list, id);
    if let Some(slot) = find_slot_by_id(&sched, id) {
        sched.tasks[slot].state = TaskState::Blocked;
    }
}

fn wait_enqueue_locked(sched: &mut Scheduler, list: &mut WaitList, id: TaskId) {
    let Some(slot) = find_slot_by_id(sched, id) else {
        return;
    };
    sched.tasks[slot].wait_next = None;
    match list.tail {
        None => {
            list.head = Some(id);
            list.tail = Some(id);
        }
        Some(tail_id) => {
            if let Some(tail_slot) = find_slot_by_id(sched, tail_id) {
                sched.tasks[tail_slot].wait_next = Some(id);
            }
            list.tail = Some(id);
        }
    }
}

/// Pops the longest-waiting task off `list` and transitions it back to
/// `READY` (handles both the plain-`BLOCKED` and timed-`SLEEPING` cases).
/// The caller (a `sync::*` primitive) is responsible for handing it
/// whatever it was waiting for before unblocking it.
pub(crate) fn wait_pop_front(list: &mut WaitList) -> Option<TaskId> {
    let mut sched = KERNEL.lock();
    let id = list.head?;
    let Some(slot) = find_slot_by_id(&sched, id) else {
        list.head = None;
        list.tail = None;
        return None;
    };
    list.head = sched.tasks[slot].wait_next;
    if list.head.is_none() {
        list.tail = None;
    }
    sched.tasks[slot].wait_next = None;
    unblock_slot_locked(&mut sched, slot);
    Some(id)
}

/// Removes an arbitrary waiter from `list` without waking it (used by
/// timeout expiry, where the sleep-list wakeup already happened, and by
/// `delete`-style operations). Returns whether it was present.
pub(crate) fn wait_remove(list: &mut WaitList, id: TaskId) -> bool {
    let mut sched = KERNEL.lock();
    let mut prev: Option<TaskId> = None;
    let mut cur = list.head;
    while let Some(cur_id) = cur {
        let Some(cur_slot) = find_slot_by_id(&sched, cur_id) else {
            return false;
        };
        let next = sched.tasks[cur_slot].wait_next;
        if cur_id == id {
            match prev {
                None => list.head = next,
                Some(prev_id) => {
                    if let Some(prev_slot) = find_slot_by_id(&sched, prev_id) {
                        sched.tasks[prev_slot].wait_next = next;
                    }
                }
            }
            if list.tail == Some(cur_id) {
                list.tail = prev;
            }
            sched.tasks[cur_slot].wait_next = None;
            return true;
        }
        prev = Some(cur_id);
        cur = next;
    }
    false
}

/// Re-enqueues an already-`BLOCKED` task id onto `list`'s tail, without
/// touching its state. Used by `sync::event_group::set_bits` when a
/// waiter's condition isn't satisfied yet and it needs to go back on the
/// (rebuilt) waiter list.
pub(crate) fn requeue_waiter(list: &mut WaitList, id: TaskId) {
    let mut sched = KERNEL.lock();
    wait_enqueue_locked(&mut sched, list, id);
}

/// Wakes `id` directly without going through a `WaitList` (used when a
/// timeout fires: the task is removed from the IPC wait list via
/// `wait_remove` first, then woken here so it observes the "timed out"
/// outcome rather than whatever the primitive's success path would give
/// it).
pub(crate) fn wake_task(id: TaskId) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        unblock_slot_locked(&mut sched, slot);
    }
}

/// Arms a timeout for the calling task (already enqueued on an IPC wait
/// list) by putting it on the sleep list, then yields. On resume, the
/// caller must check whether it is still on the IPC wait list (timed out)
/// or was already removed by the primitive's wake path (satisfied).
pub(crate) fn block_current_with_timeout(ticks: u64) {
    {
        let mut sched = KERNEL.lock();
        let cpu = this_cpu();
        let slot = sched.per_cpu[cpu].current.expect("block_current_with_timeout with no current task");
        let now = platform::get_ticks();
        sched.tasks[slot].sleep_until_tick = now + ticks.max(1);
        sched.tasks[slot].state = TaskState::Sleeping;
        insert_sleep_sorted_locked(&mut sched, cpu, slot);
    }
    platform::yield_now();
}

pub(crate) fn boost_weight(id: TaskId, candidate: u8) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        if candidate > sched.tasks[slot].weight {
            sched.tasks[slot].weight = candidate;
        }
    }
}

pub(crate) fn restore_base_weight(id: TaskId) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        sched.tasks[slot].weight = sched.tasks[slot].base_weight;
    }
}

pub(crate) fn task_weight_of(id: TaskId) -> Option<u8> {
    let sched = KERNEL.lock();
    find_slot_by_id(&sched, id).map(|s| sched.tasks[s].weight)
}

pub(crate) fn task_base_weight_of(id: TaskId) -> Option<u8> {
    let sched = KERNEL.lock();
    find_slot_by_id(&sched, id).map(|s| sched.tasks[s].base_weight)
}

/// Event-wait bookkeeping (§3 "Event-wait"), set by `sync::event_group`
/// before blocking the calling task and read back after it wakes.
pub(crate) fn set_event_wait_info(id: TaskId, mask: u32, flags: EventWaitFlags) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        sched.tasks[slot].event_mask = mask;
        sched.tasks[slot].event_flags = flags;
    }
}

pub(crate) fn event_wait_info(id: TaskId) -> Option<(u32, EventWaitFlags)> {
    let sched = KERNEL.lock();
    find_slot_by_id(&sched, id).map(|s| (sched.tasks[s].event_mask, sched.tasks[s].event_flags))
}

pub(crate) fn set_event_result(id: TaskId, result: u32, satisfied: bool) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        sched.tasks[slot].event_result = result;
        sched.tasks[slot].event_flags.set(EventWaitFlags::SATISFIED, satisfied);
    }
}

/// Reads back and clears a task's event-wait result, consumed once by the
/// waiter after it wakes.
pub(crate) fn take_event_result(id: TaskId) -> (u32, bool) {
    let mut sched = KERNEL.lock();
    match find_slot_by_id(&sched, id) {
        Some(slot) => {
            let result = sched.tasks[slot].event_result;
            let satisfied = sched.tasks[slot].event_flags.contains(EventWaitFlags::SATISFIED);
            sched.tasks[slot].event_result = 0;
            sched.tasks[slot].event_mask = 0;
            sched.tasks[slot].event_flags = EventWaitFlags::empty();
            (result, satisfied)
        }
        None => (0, false),
    }
}

/// Marks `id` as having been directly handed a semaphore unit by `signal`
/// (§4.6 "handoff"), so its next wake doesn't need `count > 0` to proceed.
pub(crate) fn grant_sem_handoff(id: TaskId) {
    let mut sched = KERNEL.lock();
    if let Some(slot) = find_slot_by_id(&sched, id) {
        sched.tasks[slot].sem_handoff = true;
    }
}

/// Reads back and clears `id`'s handoff flag, consumed once by the waiter
/// after it wakes.
pub(crate) fn take_sem_handoff(id: TaskId) -> bool {
    let mut sched = KERNEL.lock();
    match find_slot_by_id(&sched, id) {
        Some(slot) => core::mem::replace(&mut sched.tasks[slot].sem_handoff, false),
        None => false,
    }
}

// --- Tick handler and context-switch entry points --------------------------

/// §4.3 tick handler: peels expired sleepers, accounts the running task's
/// quantum, and decides whether a reschedule is needed. Called once per
/// timer interrupt on each CPU (and, in hosted tests, directly by
/// `platform::test_stub::TestPlatform::advance_ticks`).
pub fn scheduler_tick() -> bool {
    let mut sched = KERNEL.lock();
    if !sched.enabled {
        return false;
    }
    let cpu = this_cpu();
    let now = platform::get_ticks();

    wake_expired_sleepers_locked(&mut sched, cpu, now);

    let Some(cur_slot) = sched.per_cpu[cpu].current else {
        return !sched.per_cpu[cpu].ready.is_empty();
    };

    if sched.tasks[cur_slot].is_idle {
        return !sched.per_cpu[cpu].ready.is_empty();
    }

    if sched.tasks[cur_slot].time_slice > 0 {
        sched.tasks[cur_slot].time_slice -= 1;
    }
    if sched.tasks[cur_slot].time_slice == 0 {
        return true;
    }

    match sched.per_cpu[cpu].ready.peek_min_vruntime(&sched.tasks) {
        Some(min_v) => vruntime_less(min_v, sched.tasks[cur_slot].vruntime),
        None => false,
    }
}

/// Accounts the outgoing task's quantum (if it is still `RUNNING`, i.e.
/// this is a preemption rather than a voluntary block/sleep/exit that
/// already changed its state) and picks the next task to run.
fn perform_switch_locked(sched: &mut Scheduler, cpu: usize, current_sp: usize) -> usize {
    if let Some(cur_slot) = sched.per_cpu[cpu].current {
        sched.tasks[cur_slot].sp = current_sp;
        if sched.tasks[cur_slot].state == TaskState::Running && !sched.tasks[cur_slot].is_idle {
            let max_slice = sched.tasks[cur_slot].weight as u32 * config::BASE_SLICE_TICKS;
            let remaining = sched.tasks[cur_slot].time_slice;
            let ticks_ran = max_slice.saturating_sub(remaining).max(1);
            let w = sched.tasks[cur_slot].weight.max(1) as u64;
            sched.tasks[cur_slot].vruntime = sched.tasks[cur_slot]
                .vruntime
                .wrapping_add((ticks_ran as u64 * config::VRUNTIME_SCALER) / w);
            sched.tasks[cur_slot].time_slice = sched.tasks[cur_slot].weight as u32 * config::BASE_SLICE_TICKS;
            sched.tasks[cur_slot].state = TaskState::Ready;
            sched.per_cpu[cpu].ready.push(&mut sched.tasks, cur_slot);
        } else if sched.tasks[cur_slot].state == TaskState::Running && sched.tasks[cur_slot].is_idle {
            sched.tasks[cur_slot].state = TaskState::Ready;
        }
    }

    let next_slot = sched.per_cpu[cpu]
        .ready
        .pop_min(&mut sched.tasks)
        .unwrap_or(sched.per_cpu[cpu].idle_slot);
    sched.tasks[next_slot].state = TaskState::Running;
    sched.per_cpu[cpu].current = Some(next_slot);
    CONTEXT_SWITCHES.fetch_add(1, Ordering::Relaxed);
    sched.tasks[next_slot].sp
}

/// Called from the arch layer's timer/yield interrupt entry points with the
/// interrupted task's saved stack pointer. `do_tick` is `true` for the
/// periodic timer (advances the tick and runs [`scheduler_tick`] to decide
/// whether to switch) and `false` for a voluntary yield (always switches).
/// Returns the stack pointer to resume — either `current_sp` unchanged or
/// the newly selected task's saved `sp`.
pub fn schedule_from_interrupt(current_sp: usize, do_tick: bool) -> usize {
    let need_switch = if do_tick {
        platform::advance_tick();
        scheduler_tick()
    } else {
        true
    };

    if !need_switch {
        return current_sp;
    }

    let mut sched = KERNEL.lock();
    if !sched.enabled {
        return current_sp;
    }
    let cpu = this_cpu();
    perform_switch_locked(&mut sched, cpu, current_sp)
}

// --- Garbage collection and stack-overflow audit ---------------------------

fn gc_sweep_locked(sched: &mut Scheduler) -> usize {
    let mut freed = 0;
    let mut cur = sched.zombie_head;
    while let Some(slot) = cur {
        let next = sched.tasks[slot].sched_next;
        let stack_base = sched.tasks[slot].stack_base;
        let stack_owned = sched.tasks[slot].stack_owned;
        if stack_owned && stack_base != 0 && kernel_alloc::is_heap_pointer(stack_base as *const u8) {
            unsafe { kernel_alloc::free(stack_base as *mut u8) };
        }
        sched.tasks[slot] = Task::unused();
        sched.tasks[slot].sched_next = sched.free_head;
        sched.free_head = Some(slot);
        sched.task_count = sched.task_count.saturating_sub(1);
        freed += 1;
        cur = next;
    }
    sched.zombie_head = None;
    freed
}

/// Walks every live task's stack canary (§4.3 "Stack-overflow audit").
/// Corruption of another task's stack results in that task being
/// summarily deleted; corruption of the calling task's own stack is
/// unrecoverable and panics the platform.
pub fn audit_stacks() {
    let self_id = current_task_id();
    let corrupted: heapless::Vec<TaskId, { config::MAX_TASKS }> = {
        let sched = KERNEL.lock();
        let mut v = heapless::Vec::new();
        for t in sched.tasks.iter() {
            if t.state == TaskState::Unused || t.stack_base == 0 {
                continue;
            }
            let canary = unsafe { core::ptr::read_volatile(t.stack_base as *const u32) };
            if canary != config::STACK_CANARY {
                let _ = v.push(t.id);
            }
        }
        v
    };

    for id in corrupted {
        if id == self_id {
            log::error!("sched: stack overflow detected on self (task {})", id.0);
            platform::panic();
        } else {
            log::error!("sched: stack overflow detected on task {}, deleting", id.0);
            let _ = task_delete(id);
        }
    }
}

// --- Introspection (SPEC_FULL "Supplemented features") ---------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub cpu: u8,
    pub weight: u8,
    pub base_weight: u8,
    pub vruntime: u64,
    pub is_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    pub task_count: usize,
    pub context_switches: u64,
    pub ready_len: usize,
    pub zombie_count: usize,
}

/// Snapshot of every live (non-`UNUSED`) task, for diagnostics (SPEC_FULL's
/// `task_dump`).
pub fn task_dump() -> heapless::Vec<TaskSnapshot, { config::MAX_TASKS }> {
    let sched = KERNEL.lock();
    let mut out = heapless::Vec::new();
    for t in sched.tasks.iter() {
        if t.state == TaskState::Unused {
            continue;
        }
        let _ = out.push(TaskSnapshot {
            id: t.id,
            state: t.state,
            cpu: t.cpu,
            weight: t.weight,
            base_weight: t.base_weight,
            vruntime: t.vruntime,
            is_idle: t.is_idle,
        });
    }
    out
}

/// Aggregate counters for diagnostics (SPEC_FULL's `sched_stats`).
pub fn sched_stats() -> SchedStats {
    let sched = KERNEL.lock();
    let cpu = this_cpu();
    let mut zombie_count = 0;
    let mut cur = sched.zombie_head;
    while let Some(slot) = cur {
        zombie_count += 1;
        cur = sched.tasks[slot].sched_next;
    }
    SchedStats {
        task_count: sched.task_count,
        context_switches: CONTEXT_SWITCHES.load(Ordering::Relaxed),
        ready_len: sched.per_cpu[cpu].ready.len(),
        zombie_count,
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared hosted-test plumbing for `KERNEL`, reused by every `sync::*`
/// module's own `#[cfg(test)]` tests (queues, mutexes, semaphores, ...)
/// since they all block/wake through this same global scheduler.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{scheduler_init, Scheduler, KERNEL};
    use std::sync::Mutex as StdMutex;

    /// `cargo test` runs tests in parallel, but `KERNEL` is one shared
    /// global; serializing here (and resetting it on entry via
    /// `scheduler_init`'s own idempotent reset path) keeps tests that touch
    /// the scheduler from interleaving. A deliberate testing-infrastructure
    /// choice, not part of the scheduler's real concurrency model.
    static TEST_SERIAL: StdMutex<()> = StdMutex::new(());

    pub(crate) fn reset() -> std::sync::MutexGuard<'static, ()> {
        let guard = TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut sched = KERNEL.lock();
            *sched = Scheduler::empty();
        }
        crate::arch::test_stub::TEST_ARCH.take_yield_requested();
        crate::platform::test_stub::TEST_PLATFORM.reset();
        scheduler_init();
        guard
    }

    /// Resets the global scheduler, runs `f` while holding the test-serial
    /// lock, then drops the lock. For `sync::*` primitives whose tests only
    /// need a clean, serialized scheduler and don't inspect the guard.
    pub(crate) fn with_reset_scheduler<F: FnOnce()>(f: F) {
        let _g = reset();
        f();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::reset;
    use super::*;

    extern "C" fn noop_entry(_arg: usize) {}

    #[test]
    fn first_task_create_yields_id_one() {
        let _g = reset();
        let id = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        assert_eq!(id.0, 1);
    }

    #[test]
    fn id_is_reissued_after_gc() {
        let _g = reset();
        let id1 = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        task_delete(id1).unwrap();
        {
            let mut sched = KERNEL.lock();
            gc_sweep_locked(&mut sched);
        }
        let id2 = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn sleep_semantics_s2() {
        let _g = reset();
        let id = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        {
            let mut sched = KERNEL.lock();
            let slot = find_slot_by_id(&sched, id).unwrap();
            sched.per_cpu[0].ready.remove(&mut sched.tasks, slot);
            sched.tasks[slot].sleep_until_tick = 100;
            sched.tasks[slot].state = TaskState::Sleeping;
            insert_sleep_sorted_locked(&mut sched, 0, slot);
        }
        crate::platform::test_stub::TEST_PLATFORM.advance_ticks(50);
        {
            let sched = KERNEL.lock();
            let slot = find_slot_by_id(&sched, id).unwrap();
            assert_eq!(sched.tasks[slot].state, TaskState::Sleeping);
        }
        crate::platform::test_stub::TEST_PLATFORM.advance_ticks(50);
        {
            let sched = KERNEL.lock();
            let slot = find_slot_by_id(&sched, id).unwrap();
            assert_eq!(sched.tasks[slot].state, TaskState::Ready);
        }
    }

    #[test]
    fn round_robin_s3() {
        let _g = reset();
        let t1 = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        let t2 = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();

        // `task_create` doesn't itself switch `current`; pick the first
        // runnable task to seed the scenario the way `scheduler_start`
        // would.
        {
            let mut sched = KERNEL.lock();
            let next = sched.per_cpu[0].ready.pop_min(&mut sched.tasks).unwrap();
            sched.tasks[next].state = TaskState::Running;
            sched.per_cpu[0].current = Some(next);
        }
        assert_eq!(current_task_id(), t1);

        let sp = schedule_from_interrupt(0, false);
        let _ = sp;
        assert_eq!(current_task_id(), t2);

        let _ = schedule_from_interrupt(0, false);
        assert_eq!(current_task_id(), t1);
    }

    #[test]
    fn notification_accumulation() {
        let _g = reset();
        let id = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL).unwrap();
        {
            let mut sched = KERNEL.lock();
            let slot = find_slot_by_id(&sched, id).unwrap();
            sched.per_cpu[0].ready.remove(&mut sched.tasks, slot);
            sched.tasks[slot].state = TaskState::Blocked;
        }
        task_notify(id, 0b001);
        task_notify(id, 0b010);
        {
            let sched = KERNEL.lock();
            let slot = find_slot_by_id(&sched, id).unwrap();
            assert_eq!(sched.tasks[slot].notify_value, 0b011);
            assert_eq!(sched.tasks[slot].state, TaskState::Ready);
        }
    }

    #[test]
    fn weight_boost_and_restore() {
        let _g = reset();
        let low = task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();
        boost_weight(low, 8);
        assert_eq!(task_weight_of(low), Some(8));
        restore_base_weight(low);
        assert_eq!(task_weight_of(low), Some(1));
    }

    #[test]
    fn idle_task_never_enters_ready_heap() {
        let _g = reset();
        let sched = KERNEL.lock();
        assert!(sched.tasks[sched.per_cpu[0].idle_slot].heap_index < 0);
        assert!(sched.tasks[sched.per_cpu[0].idle_slot].is_idle);
    }

    #[test]
    fn deleting_idle_task_is_rejected() {
        let _g = reset();
        let idle_slot = {
            let sched = KERNEL.lock();
            sched.per_cpu[0].idle_slot
        };
        let idle_id = {
            let sched = KERNEL.lock();
            sched.tasks[idle_slot].id
        };
        assert_eq!(task_delete(idle_id), Err(SchedulerError::IdleTaskDeletion));
    }
}
