//! x86_64 `Platform`: a PIT-driven tick source at
//! [`PIT_HZ`] Hz, `hlt`-based idling, and the panic sink. Grounded in the
//! teacher's `utils/timer.rs` (PIT-interrupt-driven uptime counter), minus
//! the millisecond-uptime bookkeeping the teacher layers on top — this
//! crate's tunables are expressed purely in ticks (§6).

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::instructions::port::Port;

use crate::arch::Arch;

use super::Platform;

/// PIT interrupt frequency. The PIT's base frequency is ~1.193182 MHz;
/// dividing by this gives the 16-bit reload value `pit_init` programs.
pub const PIT_HZ: u32 = 250;

static TICKS: AtomicU64 = AtomicU64::new(0);

pub struct X86Platform;

pub static PLATFORM: X86Platform = X86Platform;

/// Programs PIT channel 0 for periodic mode at [`PIT_HZ`]. Must run after
/// [`super::super::x86_64::peripheral::pic::init`] remaps the PIC vectors.
pub fn init_pit() {
    const PIT_BASE_HZ: u32 = 1_193_182;
    let divisor = (PIT_BASE_HZ / PIT_HZ) as u16;

    let mut command: Port<u8> = Port::new(0x43);
    let mut channel0: Port<u8> = Port::new(0x40);
    unsafe {
        command.write(0x36u8); // channel 0, lobyte/hibyte, mode 3 (square wave)
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    log::info!("pit: programmed for {} Hz", PIT_HZ);
}

/// Called once per timer interrupt, from inside
/// [`crate::arch::x86_64::context::timer_schedule_from_interrupt`]'s
/// caller (`crate::sched::schedule_from_interrupt`). Advances the
/// monotonic tick.
pub fn on_tick() -> u64 {
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

impl Platform for X86Platform {
    fn get_ticks(&self) -> u64 {
        TICKS.load(Ordering::SeqCst)
    }

    fn advance_tick(&self) -> u64 {
        on_tick()
    }

    fn cpu_idle(&self) {
        x86_64::instructions::hlt();
    }

    unsafe fn start_scheduler(&self, sp: usize) -> ! {
        unsafe {
            core::arch::asm!(
                "mov rsp, {sp}",
                "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
                "pop r10", "pop r9", "pop r8",
                "pop rbp", "pop rdi", "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
                "iretq",
                sp = in(reg) sp,
                options(noreturn),
            )
        }
    }

    fn yield_now(&self) {
        crate::arch::x86_64::ARCH.request_yield();
    }

    fn panic(&self) {
        crate::arch::x86_64::ARCH.irq_lock();
        log::error!("kernel panic: halting");
        loop {
            x86_64::instructions::hlt();
        }
    }

    fn get_cpu_freq(&self) -> u64 {
        PIT_HZ as u64
    }
}
