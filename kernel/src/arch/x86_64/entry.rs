//! x86_64 kernel entry point and panic handler.

use core::panic::PanicInfo;

pub fn arch_early_init() {
    // SAFETY: cli is required before the IDT/PIC are configured, to keep
    // an interrupt from firing into unconfigured handlers.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    crate::print::init(crate::serial::SerialPort::from_inner(crate::arch::x86_64::serial_init()));
    crate::kprintln!("[KERNEL] Nucleus kernel entry reached");
    crate::kprintln!("[KERNEL] version {}", env!("CARGO_PKG_VERSION"));
    crate::kprintln!("[KERNEL] architecture: x86_64");
}

pub fn arch_panic_handler(info: &PanicInfo) {
    crate::kprintln!("[PANIC] {}", info);
}
