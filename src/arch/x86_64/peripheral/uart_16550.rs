//! Minimal 16550 UART driver, just enough to give the kernel logger
//! somewhere to write. COM1 only; flow control and RX are not needed since
//! this crate treats the serial console purely as a log sink (the line
//! editor / CLI that would read from it is an external collaborator).

use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1_BASE: u16 = 0x3F8;

pub struct SerialPort {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            line_status: Port::new(base + 5),
        }
    }

    fn init(&mut self) {
        unsafe {
            Port::<u8>::new(COM1_BASE + 1).write(0x00u8); // disable interrupts
            Port::<u8>::new(COM1_BASE + 3).write(0x80u8); // enable DLAB
            Port::<u8>::new(COM1_BASE).write(0x03u8); // divisor low: 38400 baud
            Port::<u8>::new(COM1_BASE + 1).write(0x00u8); // divisor high
            Port::<u8>::new(COM1_BASE + 3).write(0x03u8); // 8 bits, no parity, one stop bit
            Port::<u8>::new(COM1_BASE + 2).write(0xC7u8); // enable + clear FIFO, 14-byte threshold
            Port::<u8>::new(COM1_BASE + 4).write(0x0Bu8); // IRQs disabled, RTS/DSR set
        }
    }

    fn transmit_empty(&mut self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe { self.data.write(byte) };
    }
}

pub static COM1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1_BASE));

pub fn init() {
    COM1.lock().init();
}

pub struct SerialWriter;

impl core::fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut port = COM1.lock();
        for byte in s.bytes() {
            port.write_byte(byte);
        }
        Ok(())
    }
}
