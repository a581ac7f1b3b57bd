//! Hosted `Platform` stub: ticks are advanced explicitly by tests
//! (`advance_ticks`) rather than by a real timer interrupt, so scheduler
//! tests can deterministically exercise §8's S2/S7 sleep-wake scenarios.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::Platform;

pub struct TestPlatform {
    ticks: AtomicU64,
    panicked: AtomicBool,
}

pub static TEST_PLATFORM: TestPlatform = TestPlatform::new();

impl TestPlatform {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            panicked: AtomicBool::new(false),
        }
    }

    /// Advances the tick counter by `n` and runs the scheduler tick
    /// handler `n` times, as a real timer ISR would.
    pub fn advance_ticks(&self, n: u64) {
        for _ in 0..n {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            crate::sched::scheduler_tick();
        }
    }

    pub fn did_panic(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::SeqCst);
        self.panicked.store(false, Ordering::SeqCst);
    }
}

impl Platform for TestPlatform {
    fn get_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn advance_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn cpu_idle(&self) {}

    unsafe fn start_scheduler(&self, _sp: usize) -> ! {
        panic!("TestPlatform::start_scheduler() is not exercised under cargo test");
    }

    fn yield_now(&self) {}

    fn panic(&self) {
        self.panicked.store(true, Ordering::SeqCst);
    }

    fn get_cpu_freq(&self) -> u64 {
        1_000_000
    }
}
