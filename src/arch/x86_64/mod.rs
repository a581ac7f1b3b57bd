//! x86_64 architecture port.
//!
//! Concrete [`crate::arch::Arch`] implementation for the reference target:
//! GDT/IDT bring-up borrowed from the teacher's `arch/x86_64/gdt.rs` and
//! `idt.rs`, PIC remap from `arch/x86_64/peripheral/pic.rs`, and a 16550
//! serial port for the logger. The actual register-save/restore context
//! switch is an external collaborator per the design brief (referenced
//! through `initialize_stack`/`request_yield` only) — its naked-assembly
//! implementation in [`context`] is carried over from the teacher's
//! `scheduler/mod.rs` almost verbatim, adapted to call into this crate's
//! scheduler instead of the teacher's ready queue.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod interrupts;
pub mod peripheral;

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::Arch;

pub struct X86Arch;

pub static ARCH: X86Arch = X86Arch;

impl Arch for X86Arch {
    fn irq_lock(&self) -> u64 {
        let was_enabled = x86_64::instructions::interrupts::are_enabled();
        x86_64::instructions::interrupts::disable();
        was_enabled as u64
    }

    fn irq_unlock(&self, mask: u64) {
        if mask != 0 {
            x86_64::instructions::interrupts::enable();
        }
    }

    fn irq_lock_priority(&self, _priority: u8) -> u64 {
        // The PIC offers no sub-priority masking; fall back to the same
        // all-or-nothing critical section as `irq_lock`.
        self.irq_lock()
    }

    fn dmb(&self) {
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    fn dsb(&self) {
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    fn isb(&self) {
        unsafe { core::arch::asm!("nop", options(nostack, preserves_flags)) };
    }

    fn wfi(&self) {
        x86_64::instructions::hlt();
    }

    fn nop(&self) {
        unsafe { core::arch::asm!("nop", options(nostack, preserves_flags)) };
    }

    fn test_and_set(&self, cell: &AtomicU32) -> u32 {
        cell.swap(1, Ordering::SeqCst)
    }

    fn cpu_id(&self) -> u32 {
        // Single-CPU reference port (MAX_CPUS == 1); a multi-core build
        // would read the local APIC id here.
        0
    }

    fn request_yield(&self) {
        unsafe { core::arch::asm!("int 0x81", options(nostack)) };
    }

    unsafe fn initialize_stack(
        &self,
        stack_top: *mut u8,
        entry: extern "C" fn(usize),
        arg: usize,
        exit_trampoline: extern "C" fn() -> !,
    ) -> usize {
        unsafe { context::initialize_stack(stack_top, entry, arg, exit_trampoline) }
    }

    fn reset(&self) -> ! {
        // Triple-fault by loading a zero-length IDT and forcing an
        // interrupt — the standard bare-metal "reset" trick.
        unsafe {
            let idt_ptr: [u8; 10] = [0; 10];
            core::arch::asm!("lidt [{}]", in(reg) &idt_ptr, options(nostack));
            core::arch::asm!("int3", options(nostack, noreturn));
        }
    }
}
