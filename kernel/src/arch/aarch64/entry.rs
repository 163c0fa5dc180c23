//! AArch64 kernel entry point and panic handler.

use core::panic::PanicInfo;

pub fn arch_early_init() {
    crate::print::init(crate::arch::aarch64::serial_init());
    crate::kprintln!("[KERNEL] Nucleus kernel entry reached");
    crate::kprintln!("[KERNEL] version {}", env!("CARGO_PKG_VERSION"));
    crate::kprintln!("[KERNEL] architecture: aarch64");
}

pub fn arch_panic_handler(info: &PanicInfo) {
    crate::kprintln!("[PANIC] {}", info);
}
