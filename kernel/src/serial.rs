//! Generic serial console abstraction shared by both backends.
//!
//! x86_64 talks to COM1 via the `uart_16550` crate; AArch64 talks to the
//! PL011 UART on the QEMU `virt` machine via raw MMIO. Both are wrapped in
//! the same [`SerialPort`] so [`crate::print`] does not need per-arch code.

use core::fmt;

pub struct SerialPort {
    #[cfg(target_arch = "x86_64")]
    inner: uart_16550::SerialPort,
    #[cfg(target_arch = "aarch64")]
    inner: Pl011Uart,
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_str(s)
    }
}

impl SerialPort {
    #[cfg(target_arch = "x86_64")]
    pub fn from_inner(inner: uart_16550::SerialPort) -> Self {
        Self { inner }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn from_inner(inner: Pl011Uart) -> Self {
        Self { inner }
    }
}

/// PL011 UART driver for the QEMU `virt` machine's fixed MMIO base.
#[cfg(target_arch = "aarch64")]
pub struct Pl011Uart {
    base_addr: usize,
}

#[cfg(target_arch = "aarch64")]
impl Pl011Uart {
    pub const fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn init(&mut self) {
        // QEMU's virt machine firmware leaves the PL011 already configured
        // at 115200 8N1; nothing to do here.
    }

    fn flag_register(&self) -> u32 {
        const UARTFR: usize = 0x18;
        // SAFETY: base_addr is the fixed PL011 MMIO base on QEMU virt.
        unsafe { core::ptr::read_volatile((self.base_addr + UARTFR) as *const u32) }
    }
}

#[cfg(target_arch = "aarch64")]
impl fmt::Write for Pl011Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        const UARTDR: usize = 0x000;
        const UARTFR_TXFF: u32 = 1 << 5;

        for byte in s.bytes() {
            while self.flag_register() & UARTFR_TXFF != 0 {
                core::hint::spin_loop();
            }
            // SAFETY: base_addr is the fixed PL011 MMIO base on QEMU virt;
            // writes to the data register are non-reentrant single bytes.
            unsafe {
                core::ptr::write_volatile((self.base_addr + UARTDR) as *mut u8, byte);
            }
        }
        Ok(())
    }
}

// Serial print macros, kept distinct from `kprint!`/`kprintln!` (print.rs)
// so bare-metal test harnesses can emit results even if the console sink in
// `print.rs` has not been initialized yet.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use core::fmt::Write;

    #[cfg(target_arch = "x86_64")]
    {
        use uart_16550::SerialPort;
        use x86_64::instructions::interrupts;

        interrupts::without_interrupts(|| {
            // SAFETY: 0x3F8 is the fixed COM1 I/O base on the x86_64 targets
            // this kernel runs on.
            let mut port = unsafe { SerialPort::new(0x3F8) };
            let _ = port.write_fmt(args);
        });
    }

    #[cfg(target_arch = "aarch64")]
    {
        let mut uart = Pl011Uart::new(0x0900_0000);
        let _ = uart.write_fmt(args);
    }
}
