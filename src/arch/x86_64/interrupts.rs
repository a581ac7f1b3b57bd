//! Thin wrappers around the x86_64 interrupt-flag instructions.
//!
//! Kept separate from [`super::X86Arch::irq_lock`] because a handful of
//! boot-time call sites (GDT/IDT/PIC bring-up) need unconditional
//! enable/disable rather than the nesting nest-and-restore discipline the
//! kernel proper uses.

use x86_64::instructions::interrupts;

pub fn enable() {
    interrupts::enable();
}

pub fn disable() {
    interrupts::disable();
}

pub fn are_enabled() -> bool {
    interrupts::are_enabled()
}

pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    interrupts::without_interrupts(f)
}
