//! Platform port (§6 "Platform port").
//!
//! Distinct from [`crate::arch::Arch`]: `Arch` is CPU-architecture
//! primitives (interrupt masking, barriers, stack frames); `Platform` is
//! board/timer-level services the scheduler and idle loop consume —
//! ticks, idling, starting the first task, and the panic sink. Real
//! system-clock/memory-map bring-up is an external collaborator per the
//! design brief; this trait only exposes the narrow interface the kernel
//! core needs from it.

#[cfg(target_arch = "x86_64")]
pub mod x86_64_platform;

#[cfg(test)]
pub mod test_stub;

pub trait Platform {
    /// Monotonic tick counter since boot (the unit of all kernel timing).
    fn get_ticks(&self) -> u64;

    /// Advances the tick counter by one and returns the new value. Called
    /// exactly once per timer interrupt, before the scheduler tick handler
    /// runs.
    fn advance_tick(&self) -> u64;

    /// Put the CPU into a low-power wait until the next interrupt; called
    /// by the idle task's loop body.
    fn cpu_idle(&self);

    /// Hands control to the scheduler for the first time, switching to the
    /// stack pointer of the first task to run. Does not return.
    ///
    /// # Safety
    /// `sp` must be a stack pointer produced by
    /// [`crate::arch::Arch::initialize_stack`].
    unsafe fn start_scheduler(&self, sp: usize) -> !;

    /// Requests a voluntary reschedule (delegates to `Arch::request_yield`
    /// on the concrete port).
    fn yield_now(&self);

    /// Stops the world and signals visibly (§7: disables interrupts and
    /// loops blinking an indicator). Does not return, but is not spelled
    /// `-> !` so call sites that still need to satisfy the borrow checker
    /// around a `match` arm can call it before an explicit `loop {}`.
    fn panic(&self);

    /// Nominal CPU frequency in Hz, used only for diagnostics.
    fn get_cpu_freq(&self) -> u64;
}

/// Ticks since boot, via the active platform port.
pub fn get_ticks() -> u64 {
    active().get_ticks()
}

/// Advances the active platform's tick counter by one.
pub fn advance_tick() -> u64 {
    active().advance_tick()
}

/// Low-power wait for the next interrupt; the idle task's loop body.
pub fn cpu_idle() {
    active().cpu_idle();
}

/// Requests a voluntary reschedule (§5 "Suspension points").
pub fn yield_now() {
    active().yield_now();
}

/// Hands control to the scheduler for the first time.
///
/// # Safety
/// See [`Platform::start_scheduler`].
pub unsafe fn start_scheduler(sp: usize) -> ! {
    unsafe { active().start_scheduler(sp) }
}

/// Nominal CPU frequency in Hz, used only for diagnostics.
pub fn get_cpu_freq() -> u64 {
    active().get_cpu_freq()
}

/// Stops the world (§7 unrecoverable-condition sink).
pub fn panic() {
    active().panic();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(target_arch = "x86_64", not(test)))]
fn active() -> &'static dyn Platform {
    &x86_64_platform::PLATFORM
}

#[cfg(test)]
fn active() -> &'static dyn Platform {
    &test_stub::TEST_PLATFORM
}
