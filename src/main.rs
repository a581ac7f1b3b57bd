//! Binary entry point for the x86_64 reference target (`--features bin`).
//!
//! Grounded in the teacher's `main.rs` boot sequence (naked `_start`
//! switching onto a static boot stack, then a `kstart`-equivalent that
//! brings up logger → GDT → IDT → drivers → memory → scheduler → IPC in
//! order, enables interrupts, spawns application tasks, and hands off to
//! the scheduler) with the teacher's BOOTBOOT loader protocol, VFS, syscall
//! layer, and shell dropped — this crate boots without a higher-half loader
//! and has no userspace (§ Non-goals), so there is no memory map to parse
//! and no process to launch beyond kernel tasks.

#![no_std]
#![no_main]

use core::arch::naked_asm;
use core::panic::PanicInfo;

use quanta_kernel::arch::x86_64::peripheral::{pic, uart_16550};
use quanta_kernel::arch::x86_64::{gdt, idt};
use quanta_kernel::platform::x86_64_platform;
use quanta_kernel::{config, platform, sched};

/// Static boot stack; BSP runs off this until the idle task's own stack
/// takes over at `start_scheduler`.
#[repr(align(16))]
struct BootStack([u8; 64 * 1024]);
static mut BOOT_STACK: BootStack = BootStack([0; 64 * 1024]);

/// Static kernel heap pool — no paging, so this is the entirety of the
/// TLSF-managed address space (`alloc_tlsf::global`'s module doc).
const HEAP_SIZE: usize = 1024 * 1024;
#[repr(align(16))]
struct HeapPool([u8; HEAP_SIZE]);
static mut HEAP_POOL: HeapPool = HeapPool([0; HEAP_SIZE]);

/// Real mode/bootloader hands off here with an unknown stack; the first
/// thing we do is switch onto our own, 16-byte-aligned, before touching
/// anything else.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "lea rsp, [{stack} + {stack_size}]",
        "and rsp, -16",
        "call {kmain}",
        "2:",
        "hlt",
        "jmp 2b",
        stack = sym BOOT_STACK,
        stack_size = const 64 * 1024,
        kmain = sym kmain,
    )
}

extern "C" fn demo_task(_arg: usize) {
    loop {
        log::trace!("demo_task: tick {}", platform::get_ticks());
        for _ in 0..100_000 {
            core::hint::spin_loop();
        }
        platform::yield_now();
    }
}

/// Brings up every subsystem in the same order the teacher's `kstart` does,
/// minus the VFS/syscall/shell stages this crate doesn't have, then hands
/// off to the scheduler. Never returns.
extern "C" fn kmain() -> ! {
    quanta_kernel::logger::init_default();
    gdt::init();
    idt::init();
    uart_16550::init();
    pic::init();
    x86_64_platform::init_pit();

    // SAFETY: `HEAP_POOL` is a `'static` array touched nowhere else in the
    // program; this is the one time its mutable reference escapes.
    let heap_pool: &'static mut [u8] = unsafe { &mut (*&raw mut HEAP_POOL).0 };
    unsafe { quanta_kernel::init(heap_pool) };

    if !quanta_kernel::selftest::run() {
        log::error!("kmain: self-check failed, halting");
        platform::panic();
    }

    sched::task_create(demo_task, 0, config::STACK_MIN_SIZE_BYTES, config::TASK_WEIGHT_NORMAL)
        .expect("failed to spawn demo task");

    quanta_kernel::arch::x86_64::interrupts::enable();
    log::info!("kmain: starting scheduler");

    let sp = sched::bootstrap_sp(0);
    // SAFETY: `sp` is the frame `scheduler_init` built for CPU 0's current
    // (idle) task via `Arch::initialize_stack`.
    unsafe { platform::start_scheduler(sp) };
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    quanta_kernel::arch::x86_64::interrupts::disable();
    log::error!("panic: {}", info);
    loop {
        quanta_kernel::arch::x86_64::ARCH.wfi();
    }
}
