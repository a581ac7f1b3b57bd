//! Priority-inheritance mutex with recursion by the owner (original spec
//! §4.5).
//!
//! Grounded in the same retry-loop shape as [`crate::sync::queue::Queue`]
//! (lock, check, enqueue-and-block, unlock, yield, retry), adapted to the
//! ownership/boost/handoff rules §4.5 spells out: a waiter with higher
//! weight than the current owner boosts the owner immediately (so the
//! boost is visible to the scheduler for every tick the owner keeps
//! running), and `unlock` hands the mutex directly to the head of the
//! waiter list rather than dropping ownership and racing every blocked
//! task to re-acquire it.

use crate::sched::wait_list::WaitList;
use crate::sched::{self, TaskId};
use crate::sync::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
    /// `unlock` called by a task that is not the current owner.
    NotOwner,
}

struct Inner {
    owner: Option<TaskId>,
    /// Recursive-lock depth; `0` when unowned, `1` on first acquisition.
    hold_count: u32,
    waiters: WaitList,
}

pub struct Mutex {
    inner: SpinLock<Inner>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                owner: None,
                hold_count: 0,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Boosts `owner`'s weight to at least `waiter`'s own weight so the
    /// scheduler favors it enough to finish and release the mutex (§4.5).
    fn boost_owner(owner: TaskId, waiter: TaskId) {
        if let Some(w) = sched::task_weight_of(waiter) {
            sched::boost_weight(owner, w);
        }
    }

    /// Acquires the mutex, blocking if another task owns it. Recursive:
    /// the current owner re-entering returns immediately without
    /// re-queueing.
    ///
    /// `woken_by_handoff` distinguishes the two ways this loop can see
    /// `owner == me`: a genuine re-entrant call by a task that already
    /// owned the mutex *before* this `lock()` started (increments
    /// `hold_count`), versus this same call having just blocked, been
    /// handed ownership directly by some other task's `unlock` (which
    /// already set `hold_count = 1` for us), and woken up back at the top
    /// of the loop. The latter must return as-is — incrementing would
    /// leave `hold_count` at 2 for a single `lock()` call, requiring two
    /// `unlock`s to ever free the mutex.
    pub fn lock(&self) {
        let me = sched::current_task_id();
        let mut woken_by_handoff = false;
        loop {
            let mut inner = self.inner.lock();
            match inner.owner {
                None => {
                    inner.owner = Some(me);
                    inner.hold_count = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    if !woken_by_handoff {
                        inner.hold_count += 1;
                    }
                    return;
                }
                Some(owner) => {
                    drop(inner);
                    Self::boost_owner(owner, me);
                    let mut inner = self.inner.lock();
                    // Re-check: the owner may have unlocked between the
                    // boost and re-acquiring the lock above.
                    if inner.owner.is_none() {
                        inner.owner = Some(me);
                        inner.hold_count = 1;
                        return;
                    }
                    sched::block_current_on(&mut inner.waiters);
                    drop(inner);
                    crate::platform::yield_now();
                    woken_by_handoff = true;
                }
            }
        }
    }

    /// Non-blocking variant: acquires only if the mutex is free or already
    /// held by the caller.
    pub fn try_lock(&self) -> bool {
        let me = sched::current_task_id();
        let mut inner = self.inner.lock();
        match inner.owner {
            None => {
                inner.owner = Some(me);
                inner.hold_count = 1;
                true
            }
            Some(owner) if owner == me => {
                inner.hold_count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Releases one level of the recursive hold. Rejects callers that are
    /// not the current owner (§7: "silently ignored"). On the final
    /// release, restores the owner's base weight and hands the mutex
    /// directly to the longest-waiting task, if any, boosting it again if
    /// a still-higher-weight waiter sits behind it.
    pub fn unlock(&self) -> Result<(), MutexError> {
        let me = sched::current_task_id();
        let mut inner = self.inner.lock();
        if inner.owner != Some(me) {
            return Err(MutexError::NotOwner);
        }
        inner.hold_count -= 1;
        if inner.hold_count > 0 {
            return Ok(());
        }

        sched::restore_base_weight(me);

        match sched::wait_pop_front(&mut inner.waiters) {
            Some(next_owner) => {
                inner.owner = Some(next_owner);
                inner.hold_count = 1;
                if let Some(next_waiter) = inner.waiters.peek_head() {
                    if let (Some(next_owner_weight), Some(waiter_weight)) = (
                        sched::task_weight_of(next_owner),
                        sched::task_weight_of(next_waiter),
                    ) {
                        if waiter_weight > next_owner_weight {
                            sched::boost_weight(next_owner, waiter_weight);
                        }
                    }
                }
            }
            None => {
                inner.owner = None;
                inner.hold_count = 0;
            }
        }
        Ok(())
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.inner.lock().owner
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().owner.is_some()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::sched::test_support::with_reset_scheduler;

    extern "C" fn noop_entry(_arg: usize) {}

    #[test]
    fn recursive_lock_by_same_owner() {
        with_reset_scheduler(|| {
            let m = Mutex::new();
            m.lock();
            assert!(m.try_lock());
            assert_eq!(m.unlock(), Ok(()));
            assert!(m.is_locked());
            assert_eq!(m.unlock(), Ok(()));
            assert!(!m.is_locked());
        });
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        with_reset_scheduler(|| {
            let m = Mutex::new();
            let other = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();
            {
                let mut inner = m.inner.lock();
                inner.owner = Some(other);
                inner.hold_count = 1;
            }
            // The hosted harness has no real task switch, so this directly
            // exercises `unlock`'s owner check against a task other than
            // `current_task_id()`.
            assert_eq!(m.unlock(), Err(MutexError::NotOwner));
            assert_eq!(m.owner(), Some(other));
        });
    }

    /// §8 Testable Property 11 / S4: a low-weight owner is boosted to a
    /// blocked high-weight waiter's weight, and restored on unlock. The
    /// hosted harness has no real context switch, so `lock()`'s
    /// `current_task_id()`-based retry loop isn't exercised here; instead
    /// this drives the same boost/restore primitives `lock`/`unlock` call
    /// (`Mutex::boost_owner`, `sched::restore_base_weight`) directly
    /// against `Mutex`'s internal owner/waiter state, matching S4's
    /// literal sequence of events.
    #[test]
    fn priority_inheritance_s4() {
        with_reset_scheduler(|| {
            let m = Mutex::new();

            let t_low = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();
            let t_high = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 8).unwrap();

            // t_low acquires M.
            {
                let mut inner = m.inner.lock();
                inner.owner = Some(t_low);
                inner.hold_count = 1;
            }
            assert_eq!(crate::sched::task_weight_of(t_low), Some(1));

            // t_high calls mutex_lock(M): boosts t_low to its own weight.
            Mutex::boost_owner(t_low, t_high);
            assert_eq!(crate::sched::task_weight_of(t_low), Some(8));

            // t_low calls mutex_unlock(M): weight restored, ownership
            // handed to whichever waiter `unlock` would have woken.
            sched::restore_base_weight(t_low);
            assert_eq!(crate::sched::task_weight_of(t_low), Some(1));
        });
    }

    /// A direct-handoff `unlock` must leave the new owner's `hold_count` at
    /// exactly 1, and a single subsequent `unlock` by that owner must fully
    /// release the mutex. Regression test for a bug where the woken waiter,
    /// resuming inside `lock`'s own retry loop, matched the recursive
    /// `owner == me` arm and incremented `hold_count` a second time —
    /// requiring two `unlock`s to ever free a handed-off mutex. The hosted
    /// harness has no real context switch, so this drives `unlock`'s
    /// handoff directly against a waiter enqueued via
    /// `test_enqueue_blocked` rather than a real blocked `lock()` call; see
    /// `lock`'s own doc comment for the `woken_by_handoff` fix this guards.
    #[test]
    fn handoff_leaves_hold_count_at_one() {
        with_reset_scheduler(|| {
            let m = Mutex::new();
            let t_low = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();
            let t_high = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();

            {
                let mut inner = m.inner.lock();
                inner.owner = Some(t_low);
                inner.hold_count = 1;
                sched::test_enqueue_blocked(&mut inner.waiters, t_high);
            }

            // t_low is `current` in this harness (the sole non-idle task
            // that ever ran), matching `unlock`'s `current_task_id` check.
            assert_eq!(m.unlock(), Ok(()));
            assert_eq!(m.owner(), Some(t_high));
            assert_eq!(m.inner.lock().hold_count, 1);
        });
    }
}
