//! Interrupt Descriptor Table bring-up.
//!
//! Exception handlers here just log and halt (no userspace, no paging, so
//! there's nothing recoverable to do beyond `platform_panic`'s "disable
//! interrupts and loop" contract, §7). Adapted from the teacher's
//! `arch/x86_64/idt.rs`: the lazy heap-fault / userspace page-fault path is
//! dropped (virtual memory and process isolation are explicit non-goals),
//! and IRQ0/INT 0x81 are wired to this crate's scheduler tick and
//! voluntary-yield entry points instead of the teacher's thread switch.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use super::context::{timer_interrupt_entry, yield_interrupt_entry};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(fault_handler);
        idt.debug.set_handler_fn(trap_handler);
        idt.non_maskable_interrupt.set_handler_fn(fault_handler);
        idt.breakpoint.set_handler_fn(trap_handler);
        idt.overflow.set_handler_fn(fault_handler);
        idt.bound_range_exceeded.set_handler_fn(fault_handler);
        idt.invalid_opcode.set_handler_fn(fault_handler);
        idt.device_not_available.set_handler_fn(fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(super::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(fault_handler_ec);
        idt.segment_not_present.set_handler_fn(fault_handler_ec);
        idt.stack_segment_fault.set_handler_fn(fault_handler_ec);
        idt.general_protection_fault.set_handler_fn(fault_handler_ec);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(fault_handler);
        idt.alignment_check.set_handler_fn(fault_handler_ec);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(fault_handler);
        idt.virtualization.set_handler_fn(fault_handler);
        idt.security_exception.set_handler_fn(fault_handler_ec);

        unsafe {
            idt[0x81].set_handler_addr(x86_64::VirtAddr::new(
                yield_interrupt_entry as usize as u64,
            ));
            idt[32].set_handler_addr(x86_64::VirtAddr::new(
                timer_interrupt_entry as usize as u64,
            ));
        }
        idt[33].set_handler_fn(generic_irq_handler); // IRQ1, no keyboard driver in this crate

        idt
    };
}

pub fn init() {
    IDT.load();
    log::info!("idt: loaded");
}

extern "x86-interrupt" fn fault_handler(frame: InterruptStackFrame) {
    log::error!("unhandled CPU exception at {:#x}", frame.instruction_pointer.as_u64());
    crate::platform::panic();
}

extern "x86-interrupt" fn fault_handler_ec(frame: InterruptStackFrame, error_code: u64) {
    log::error!(
        "unhandled CPU exception at {:#x} (error code {:#x})",
        frame.instruction_pointer.as_u64(),
        error_code
    );
    crate::platform::panic();
}

extern "x86-interrupt" fn trap_handler(_frame: InterruptStackFrame) {
    // Debug/breakpoint traps are non-fatal; just resume.
}

extern "x86-interrupt" fn double_fault_handler(
    frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    log::error!("double fault at {:#x}", frame.instruction_pointer.as_u64());
    crate::platform::panic();
    loop {
        x86_64::instructions::hlt();
    }
}

extern "x86-interrupt" fn machine_check_handler(_frame: InterruptStackFrame) -> ! {
    crate::platform::panic();
    loop {
        x86_64::instructions::hlt();
    }
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: x86_64::structures::idt::PageFaultErrorCode,
) {
    // No virtual memory (non-goal): every page fault is unrecoverable here.
    let fault_addr = x86_64::registers::control::Cr2::read().ok();
    log::error!(
        "page fault at {:?} (rip {:#x}, code {:?})",
        fault_addr,
        frame.instruction_pointer.as_u64(),
        error_code
    );
    crate::platform::panic();
}

extern "x86-interrupt" fn generic_irq_handler(_frame: InterruptStackFrame) {
    unsafe {
        super::peripheral::pic::send_eoi(1);
    }
}
