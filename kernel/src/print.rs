//! Kernel console output.
//!
//! All kernel text output funnels through [`kprint!`]/[`kprintln!`], which
//! write to the architecture's serial console ([`crate::serial::SerialPort`])
//! under a single global lock with interrupts disabled for the duration of
//! the write. `print!`/`println!` are kept as aliases so existing call
//! sites read naturally; new code should prefer `kprint!`/`kprintln!`.
//! The `log` facade ([`crate::klog`]) is layered on top of this sink.

use core::fmt::Write;

use spin::Mutex;

use crate::{serial::SerialPort, sync::once_lock::GlobalState};

static CONSOLE: GlobalState<Mutex<SerialPort>> = GlobalState::new();

/// Initialize the console sink. Must be called once during early boot
/// before any `kprintln!` call that needs to reach the console (calls
/// before this point are silently dropped).
pub fn init(port: SerialPort) {
    let _ = CONSOLE.init(Mutex::new(port));
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    let _guard = crate::sync::CriticalSection::enter();
    CONSOLE.with_mut(|mtx| {
        let mut port = mtx.lock();
        let _ = port.write_fmt(args);
    });
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint!($($arg)*));
}

#[macro_export]
macro_rules! println {
    () => ($crate::kprintln!());
    ($($arg:tt)*) => ($crate::kprintln!($($arg)*));
}
