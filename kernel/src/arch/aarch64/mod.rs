//! AArch64 architecture support.

pub mod boot;
pub mod context;
pub mod entry;
pub mod gic;
pub mod timer;
pub mod vectors;

pub fn init() {
    vectors::init();
    gic::init().expect("GIC initialization failed");
}

pub fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("wfe");
        }
    }
}

pub fn idle() {
    unsafe {
        core::arch::asm!("wfe");
    }
}

pub fn serial_init() -> crate::serial::SerialPort {
    let mut uart = crate::serial::Pl011Uart::new(0x0900_0000);
    uart.init();
    crate::serial::SerialPort::from_inner(uart)
}

/// RAII guard that restores the DAIF interrupt-mask state on drop.
///
/// Returned by [`disable_interrupts`]; named (rather than `impl Drop`) so
/// that [`crate::sync::CriticalSection`] can hold one as a struct field.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            unsafe {
                core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
            }
        }
    }
}

/// Mask IRQs (the DAIF.I bit) and return a guard that restores the prior
/// mask state when dropped.
pub fn disable_interrupts() -> InterruptGuard {
    let daif: u64;
    unsafe {
        core::arch::asm!("mrs {0}, daif", out(reg) daif, options(nomem, nostack));
    }
    let was_enabled = daif & (1 << 7) == 0;
    unsafe {
        core::arch::asm!("msr daifset, #2", options(nomem, nostack));
    }
    InterruptGuard { was_enabled }
}

pub fn enable_interrupts() {
    unsafe {
        core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
    }
}
