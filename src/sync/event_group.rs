//! 32-bit event-bit group with AND/OR wait and clear-on-exit (original spec
//! §4.7).
//!
//! `wait_bits` stages its request/result through the task table itself
//! (`sched::set_event_wait_info`/`take_event_result`) rather than through
//! the `WaitList` alone, because a waiter's wake condition here depends on
//! *which* bits are set, not just *whether* the object became available —
//! `set_bits` has to walk every waiter and test each one's own mask/flags
//! individually instead of popping a single FIFO head the way
//! `queue`/`mutex`/`semaphore` do.

use crate::sched::task::EventWaitFlags;
use crate::sched::wait_list::WaitList;
use crate::sched::{self, TaskId};
use crate::sync::SpinLock;

struct Inner {
    bits: u32,
    waiters: WaitList,
}

pub struct EventGroup {
    inner: SpinLock<Inner>,
}

/// Matches a waiter's requested `mask` against the group's current `bits`
/// per its ALL/ANY flag.
fn satisfied(bits: u32, mask: u32, flags: EventWaitFlags) -> bool {
    if flags.contains(EventWaitFlags::MATCH_ALL) {
        bits & mask == mask
    } else {
        bits & mask != 0
    }
}

impl EventGroup {
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                bits: 0,
                waiters: WaitList::new(),
            }),
        }
    }

    /// ORs `mask` into the group, then wakes every waiter whose requested
    /// condition is now met, clearing its requested bits first if it asked
    /// for clear-on-exit and snapshotting the pre-clear value as its
    /// result (§4.7 "set_bits").
    pub fn set_bits(&self, mask: u32) {
        let mut inner = self.inner.lock();
        inner.bits |= mask;

        let mut still_waiting = WaitList::new();
        while let Some(id) = inner.waiters.peek_head() {
            sched::wait_remove(&mut inner.waiters, id);
            let Some((wait_mask, flags)) = sched::event_wait_info(id) else {
                continue;
            };
            if satisfied(inner.bits, wait_mask, flags) {
                let snapshot = inner.bits;
                if flags.contains(EventWaitFlags::CLEAR_ON_EXIT) {
                    inner.bits &= !wait_mask;
                }
                sched::set_event_result(id, snapshot, true);
                sched::wake_task(id);
            } else {
                sched::requeue_waiter(&mut still_waiting, id);
            }
        }
        inner.waiters = still_waiting;
    }

    /// ANDs the complement of `mask` into the group (§4.7 "clear_bits").
    pub fn clear_bits(&self, mask: u32) {
        let mut inner = self.inner.lock();
        inner.bits &= !mask;
    }

    /// Current bit value, without waiting or clearing (SPEC_FULL
    /// `event_group_get_bits`).
    pub fn get_bits(&self) -> u32 {
        self.inner.lock().bits
    }

    /// Waits for `mask` to be satisfied per `flags`. Fast-paths if already
    /// satisfied; otherwise enqueues, optionally arms a timeout, and
    /// yields. Returns the pre-clear snapshot and whether the wake was a
    /// genuine satisfy (`false` ⇒ timed out).
    pub fn wait_bits(&self, mask: u32, flags: EventWaitFlags, timeout_ticks: Option<u64>) -> (u32, bool) {
        {
            let mut inner = self.inner.lock();
            if satisfied(inner.bits, mask, flags) {
                let snapshot = inner.bits;
                if flags.contains(EventWaitFlags::CLEAR_ON_EXIT) {
                    inner.bits &= !mask;
                }
                return (snapshot, true);
            }
        }

        let me = sched::current_task_id();
        sched::set_event_wait_info(me, mask, flags);
        {
            let mut inner = self.inner.lock();
            sched::enqueue_current_on(&mut inner.waiters);
        }
        match timeout_ticks {
            Some(t) => sched::block_current_with_timeout(t),
            None => sched::task_block_current(),
        }

        let (result, satisfied) = sched::take_event_result(me);
        if !satisfied {
            let mut inner = self.inner.lock();
            sched::wait_remove(&mut inner.waiters, me);
        }
        (result, satisfied)
    }
}

impl Default for EventGroup {
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

    fn make_waiter(flags: EventWaitFlags, mask: u32) -> TaskId {
        let id = crate::sched::task_create(noop_entry, 0, config::STACK_MIN_SIZE_BYTES, 1).unwrap();
        sched::set_event_wait_info(id, mask, flags);
        id
    }

    #[test]
    fn any_wakes_on_first_matching_bit() {
        with_reset_scheduler(|| {
            let eg = EventGroup::new();
            let waiter = make_waiter(EventWaitFlags::empty(), 0b101);
            {
                let mut inner = eg.inner.lock();
                sched::test_enqueue_blocked(&mut inner.waiters, waiter);
            }
            eg.set_bits(0b001);
            let (result, satisfied) = sched::take_event_result(waiter);
            assert!(satisfied);
            assert_eq!(result, 0b001);
        });
    }

    /// §8 Testable Property 12 / S6: an ALL waiter stays blocked until
    /// every requested bit is set.
    #[test]
    fn all_wakes_only_when_every_bit_set_s6() {
        with_reset_scheduler(|| {
            let eg = EventGroup::new();
            let waiter = make_waiter(
                EventWaitFlags::MATCH_ALL | EventWaitFlags::CLEAR_ON_EXIT,
                0b101,
            );
            {
                let mut inner = eg.inner.lock();
                sched::test_enqueue_blocked(&mut inner.waiters, waiter);
            }

            eg.set_bits(0b001);
            let (_, still_waiting_flags) = sched::event_wait_info(waiter).unwrap();
            assert!(
                !still_waiting_flags.contains(EventWaitFlags::SATISFIED),
                "ALL waiter must stay blocked on partial match"
            );

            // `set_bits` already re-enqueued the still-unsatisfied waiter
            // onto the group's own waiter list with its request untouched,
            // so the next `set_bits` re-evaluates it as-is.
            eg.set_bits(0b100);
            let (result, satisfied) = sched::take_event_result(waiter);
            assert!(satisfied);
            assert_eq!(result, 0b101);
            assert_eq!(eg.get_bits(), 0, "clear-on-exit clears exactly the requested bits");
        });
    }

    #[test]
    fn clear_on_exit_clears_exactly_requested_bits() {
        with_reset_scheduler(|| {
            let eg = EventGroup::new();
            eg.set_bits(0b1110);
            let waiter = make_waiter(EventWaitFlags::CLEAR_ON_EXIT, 0b0110);
            {
                let mut inner = eg.inner.lock();
                sched::test_enqueue_blocked(&mut inner.waiters, waiter);
            }
            eg.set_bits(0);
            assert_eq!(eg.get_bits(), 0b1000);
        });
    }
}
