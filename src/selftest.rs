//! Runtime self-check (SPEC_FULL "Test tooling"), the boot-time equivalent of
//! the teacher's `tests/comprehensive.rs` smoke-test module: a handful of the
//! §8 end-to-end scenarios (S1 allocator round-trip, S6 event-group AND),
//! run against the *live* kernel on real hardware where `cargo test` can't.
//! Only built for the `bin` target; hosted `#[cfg(test)]` unit tests beside
//! each module already cover the same scenarios exhaustively under `std`.
//!
//! Call [`run`] once, after [`crate::init`] and [`crate::sched::scheduler_init`]
//! have brought up the heap and task table but before
//! `platform::start_scheduler` hands off control. Every check logs its own
//! pass/fail; [`run`] returns `true` only if all of them passed.

use crate::alloc_tlsf::kernel_alloc;
use crate::sched::task::EventWaitFlags;
use crate::sync::EventGroup;

fn check(name: &str, ok: bool) -> bool {
    if ok {
        log::info!("selftest: {} ... ok", name);
    } else {
        log::error!("selftest: {} ... FAILED", name);
    }
    ok
}

/// §8 S1: allocate three blocks in one order, free them in another, and
/// confirm `get_free_size` returns to its pre-allocation value exactly.
fn allocator_round_trip() -> bool {
    let before = kernel_alloc::get_free_size();
    let (p1, p2, p3) = match (
        kernel_alloc::malloc(100),
        kernel_alloc::malloc(200),
        kernel_alloc::malloc(50),
    ) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => return check("allocator_round_trip", false),
    };
    unsafe {
        kernel_alloc::free(p2);
        kernel_alloc::free(p1);
        kernel_alloc::free(p3);
    }
    let after = kernel_alloc::get_free_size();
    check("allocator_round_trip", after == before)
}

fn allocator_integrity() -> bool {
    check("allocator_integrity", kernel_alloc::check_integrity().is_ok())
}

/// §8 S6: an ALL waiter's condition only matches once every requested bit
/// is set, and `CLEAR_ON_EXIT` clears exactly those bits. Only drives
/// `wait_bits`'s already-satisfied fast path — the blocking path needs a
/// running scheduler to ever wake the waiter, which isn't up yet this early
/// in boot; the blocking path itself is covered by `event_group`'s hosted
/// tests.
fn event_group_all_and_clear() -> bool {
    let eg = EventGroup::new();
    eg.set_bits(0b001);
    eg.set_bits(0b100);
    let (result, satisfied) = eg.wait_bits(0b101, EventWaitFlags::MATCH_ALL | EventWaitFlags::CLEAR_ON_EXIT, None);
    check(
        "event_group_all_and_clear",
        satisfied && result == 0b101 && eg.get_bits() == 0,
    )
}

/// Runs every self-check and reports the aggregate result. Never panics;
/// individual failures are logged and folded into the returned boolean so a
/// caller can decide whether to proceed or halt.
pub fn run() -> bool {
    log::info!("selftest: starting boot-time self-check");
    let results = [allocator_round_trip(), allocator_integrity(), event_group_all_and_clear()];
    let all_ok = results.iter().all(|&ok| ok);
    if all_ok {
        log::info!("selftest: all checks passed");
    } else {
        log::error!("selftest: one or more checks failed");
    }
    all_ok
}
