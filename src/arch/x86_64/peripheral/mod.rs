//! Narrow peripheral surface the reference port needs: the PIC (to remap
//! and unmask IRQ0) and a 16550 serial port (for the logger). Everything
//! else the teacher's `peripheral/` directory covers — framebuffer,
//! keyboard, full UART driver feature set — is out of scope here (device
//! drivers are listed as external collaborators in the design brief).

pub mod pic;
pub mod uart_16550;
