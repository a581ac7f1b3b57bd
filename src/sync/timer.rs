//! Software timer service: a daemon task runs expired callbacks off a
//! singly-linked list of timers kept sorted by expiry (original spec §4.8).
//!
//! Grounded in the same daemon-task-over-kernel-primitives shape the rest of
//! this crate uses for background work (a task parked on
//! [`sched::task_notify_wait`], the same primitive `sync::event_group`'s
//! waiters ride on) rather than a separate soft-IRQ mechanism. The list head
//! is always the next thing to happen, so the daemon only ever needs a
//! timeout equal to the delay until the head's expiry; any mutation that
//! changes the head (an earlier insert, or cancelling the head itself) wakes
//! the daemon early via `task_notify` so it re-evaluates instead of sleeping
//! out the old timeout.

use crate::config;
use crate::platform;
use crate::sched::{self, TaskId};
use crate::sync::SpinLock;

const RECHECK_BIT: u32 = 1;

fn noop_callback() {}

#[derive(Clone, Copy)]
struct TimerEntry {
    in_use: bool,
    /// `0` for a one-shot timer, removed from the table once it fires.
    period_ticks: u64,
    expiry: u64,
    callback: fn(),
    next: Option<usize>,
}

impl TimerEntry {
    const fn empty() -> Self {
        Self {
            in_use: false,
            period_ticks: 0,
            expiry: 0,
            callback: noop_callback,
            next: None,
        }
    }
}

struct State {
    entries: [TimerEntry; config::MAX_TIMERS],
    head: Option<usize>,
    daemon: Option<TaskId>,
}

impl State {
    const fn empty() -> Self {
        Self {
            entries: [TimerEntry::empty(); config::MAX_TIMERS],
            head: None,
            daemon: None,
        }
    }
}

static STATE: SpinLock<State> = SpinLock::new(State::empty());

/// Opaque reference to a timer created via [`TimerService::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(usize);

/// Inserts `idx` into the sorted list by `expiry`, ties broken FIFO (equal
/// expiries keep insertion order). Returns `true` if `idx` became the new
/// head.
fn insert_sorted_locked(state: &mut State, idx: usize) -> bool {
    let expiry = state.entries[idx].expiry;
    match state.head {
        None => {
            state.entries[idx].next = None;
            state.head = Some(idx);
            true
        }
        Some(head_idx) if expiry < state.entries[head_idx].expiry => {
            state.entries[idx].next = Some(head_idx);
            state.head = Some(idx);
            true
        }
        Some(head_idx) => {
            let mut cur = head_idx;
            loop {
                match state.entries[cur].next {
                    Some(next_idx) if state.entries[next_idx].expiry <= expiry => {
                        cur = next_idx;
                    }
                    next => {
                        state.entries[idx].next = next;
                        state.entries[cur].next = Some(idx);
                        break;
                    }
                }
            }
            false
        }
    }
}

/// Unlinks `idx` from the list, wherever it sits. Returns `true` if it was
/// the head.
fn remove_locked(state: &mut State, idx: usize) -> bool {
    match state.head {
        Some(h) if h == idx => {
            state.head = state.entries[idx].next;
            true
        }
        Some(h) => {
            let mut cur = h;
            loop {
                match state.entries[cur].next {
                    Some(n) if n == idx => {
                        state.entries[cur].next = state.entries[idx].next;
                        break;
                    }
                    Some(n) => cur = n,
                    None => break,
                }
            }
            false
        }
        None => false,
    }
}

/// Pops every timer whose expiry is `<= now` off the head of the list,
/// auto-reloading periodic ones with a new expiry computed from `now`, and
/// reports the callbacks to run (outside the lock) plus the delay until the
/// new head, if any. Factored out of [`daemon_entry`]'s loop body so tests
/// can drive one pass without spawning the daemon task and its unbounded
/// `task_notify_wait` loop.
fn process_expirations(now: u64) -> (heapless::Vec<fn(), { config::MAX_TIMERS }>, Option<u64>) {
    let mut due = heapless::Vec::new();
    let mut state = STATE.lock();
    loop {
        let Some(idx) = state.head else { break };
        if state.entries[idx].expiry > now {
            break;
        }
        remove_locked(&mut state, idx);
        let _ = due.push(state.entries[idx].callback);
        if state.entries[idx].period_ticks > 0 {
            state.entries[idx].expiry = now + state.entries[idx].period_ticks;
            insert_sorted_locked(&mut state, idx);
        } else {
            state.entries[idx].in_use = false;
        }
    }
    let delay = state.head.map(|idx| state.entries[idx].expiry.saturating_sub(now));
    (due, delay)
}

extern "C" fn daemon_entry(_arg: usize) {
    loop {
        let now = platform::get_ticks();
        let (due, delay) = process_expirations(now);
        for cb in due.iter() {
            cb();
        }
        sched::task_notify_wait(true, delay.map(|d| d.max(1)));
    }
}

/// Handle to the daemon task plus the table of pending software timers
/// (§4.8).
pub struct TimerService;

impl TimerService {
    /// Spawns the daemon task. Call once, after `scheduler_init`.
    pub fn start(weight: u8) -> Option<TaskId> {
        let id = sched::task_create(daemon_entry, 0, config::STACK_MIN_SIZE_BYTES, weight)?;
        STATE.lock().daemon = Some(id);
        Some(id)
    }

    /// Schedules `callback` to run after `delay_ticks`, repeating every
    /// `period_ticks` if given. Returns `None` if the timer table
    /// (`config::MAX_TIMERS` slots) is full.
    pub fn create(delay_ticks: u64, period_ticks: Option<u64>, callback: fn()) -> Option<TimerHandle> {
        let mut state = STATE.lock();
        let idx = (0..config::MAX_TIMERS).find(|&i| !state.entries[i].in_use)?;
        let now = platform::get_ticks();
        state.entries[idx] = TimerEntry {
            in_use: true,
            period_ticks: period_ticks.unwrap_or(0),
            expiry: now + delay_ticks.max(1),
            callback,
            next: None,
        };
        let became_head = insert_sorted_locked(&mut state, idx);
        let daemon = state.daemon;
        drop(state);
        if became_head {
            if let Some(d) = daemon {
                sched::task_notify(d, RECHECK_BIT);
            }
        }
        Some(TimerHandle(idx))
    }

    /// Cancels a pending timer. Returns `false` if it had already fired
    /// (one-shot) or the handle is stale.
    pub fn cancel(handle: TimerHandle) -> bool {
        let mut state = STATE.lock();
        let idx = handle.0;
        if !state.entries[idx].in_use {
            return false;
        }
        let was_head = remove_locked(&mut state, idx);
        state.entries[idx].in_use = false;
        let daemon = state.daemon;
        drop(state);
        if was_head {
            if let Some(d) = daemon {
                sched::task_notify(d, RECHECK_BIT);
            }
        }
        true
    }

    pub fn is_active(handle: TimerHandle) -> bool {
        STATE.lock().entries[handle.0].in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::with_reset_scheduler;
    use core::sync::atomic::{AtomicU32, Ordering};

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn bump() {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_state() {
        let mut state = STATE.lock();
        *state = State::empty();
        HITS.store(0, Ordering::SeqCst);
    }

    #[test]
    fn one_shot_fires_once_and_is_freed() {
        with_reset_scheduler(|| {
            reset_state();
            let now = platform::get_ticks();
            let handle = TimerService::create(5, None, bump).unwrap();
            assert!(TimerService::is_active(handle));

            let (due, delay) = process_expirations(now + 4);
            assert!(due.is_empty());
            assert_eq!(delay, Some(1));

            let (due, delay) = process_expirations(now + 5);
            assert_eq!(due.len(), 1);
            assert_eq!(delay, None);
            assert!(!TimerService::is_active(handle));
        });
    }

    #[test]
    fn periodic_timer_reloads_with_new_expiry() {
        with_reset_scheduler(|| {
            reset_state();
            let now = platform::get_ticks();
            let handle = TimerService::create(3, Some(3), bump).unwrap();

            let (due, delay) = process_expirations(now + 3);
            assert_eq!(due.len(), 1);
            assert_eq!(delay, Some(3));
            assert!(TimerService::is_active(handle));

            let (due, _) = process_expirations(now + 6);
            assert_eq!(due.len(), 1);
            assert_eq!(HITS.load(Ordering::SeqCst), 0);
            for cb in due.iter() {
                cb();
            }
            assert_eq!(HITS.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn list_stays_sorted_across_out_of_order_inserts() {
        with_reset_scheduler(|| {
            reset_state();
            let now = platform::get_ticks();
            TimerService::create(30, None, bump).unwrap();
            TimerService::create(10, None, bump).unwrap();
            TimerService::create(20, None, bump).unwrap();

            let (due, delay) = process_expirations(now + 10);
            assert_eq!(due.len(), 1);
            assert_eq!(delay, Some(10));

            let (due, delay) = process_expirations(now + 20);
            assert_eq!(due.len(), 1);
            assert_eq!(delay, Some(10));

            let (due, delay) = process_expirations(now + 30);
            assert_eq!(due.len(), 1);
            assert_eq!(delay, None);
        });
    }

    #[test]
    fn cancel_head_relinks_to_next() {
        with_reset_scheduler(|| {
            reset_state();
            let now = platform::get_ticks();
            let first = TimerService::create(10, None, bump).unwrap();
            TimerService::create(20, None, bump).unwrap();

            assert!(TimerService::cancel(first));
            assert!(!TimerService::is_active(first));
            // cancelling an already-cancelled/unknown handle reports false
            assert!(!TimerService::cancel(first));

            let (due, delay) = process_expirations(now + 10);
            assert!(due.is_empty(), "cancelled timer must not fire");
            assert_eq!(delay, Some(10));

            let (due, _) = process_expirations(now + 20);
            assert_eq!(due.len(), 1);
        });
    }

    #[test]
    fn table_full_returns_none() {
        with_reset_scheduler(|| {
            reset_state();
            for _ in 0..config::MAX_TIMERS {
                TimerService::create(100, None, bump).unwrap();
            }
            assert!(TimerService::create(100, None, bump).is_none());
        });
    }
}
