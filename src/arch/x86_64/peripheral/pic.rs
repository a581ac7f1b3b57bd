//! 8259 PIC remap, carried over from the teacher's
//! `arch/x86_64/peripheral/pic.rs`. Only IRQ0 (timer) is unmasked; this
//! kernel has no keyboard/serial-interrupt driver, so the rest stay
//! masked at the slave and master.

use x86_64::instructions::port::Port;

pub fn init() {
    let mut master_command: Port<u8> = Port::new(0x20);
    let mut master_data: Port<u8> = Port::new(0x21);
    let mut slave_command: Port<u8> = Port::new(0xA0);
    let mut slave_data: Port<u8> = Port::new(0xA1);

    unsafe {
        master_command.write(0x11);
        slave_command.write(0x11);

        master_data.write(0x20); // master PIC vector offset: 32
        slave_data.write(0x28); // slave PIC vector offset: 40

        master_data.write(0x04); // slave attached at IRQ2
        slave_data.write(0x02);

        master_data.write(0x01); // 8086 mode
        slave_data.write(0x01);

        master_data.write(0xFE); // unmask IRQ0 (timer) only
        slave_data.write(0xFF);
    }
}

/// Sends End-Of-Interrupt for the given IRQ line.
///
/// # Safety
/// Must be called from within the matching interrupt handler, exactly
/// once, before returning.
pub unsafe fn send_eoi(irq: u8) {
    let mut master: Port<u8> = Port::new(0x20);
    if irq >= 8 {
        let mut slave: Port<u8> = Port::new(0xA0);
        unsafe { slave.write(0x20u8) };
    }
    unsafe { master.write(0x20u8) };
}
