//! Nucleus kernel library
//!
//! This library provides the core functionality for the Nucleus kernel
//! and exports necessary items for testing.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// naked_functions is stable since Rust 1.88.0, no feature flag needed
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare-metal targets use the custom kernel heap allocators.
// On host (x86_64-unknown-linux-gnu) for coverage/testing, delegate to the
// system allocator so that test code using Vec/String/alloc compiles and runs.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod simple_alloc_unsafe;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use simple_alloc_unsafe::{LockedUnsafeBumpAllocator, UnsafeBumpAllocator};

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[global_allocator]
pub static ALLOCATOR: UnsafeBumpAllocator = UnsafeBumpAllocator::new();

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub static LOCKED_ALLOCATOR: LockedUnsafeBumpAllocator = LockedUnsafeBumpAllocator::empty();

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Get a reference to the global allocator
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

/// Get a reference to the global allocator for AArch64
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn get_allocator() -> &'static LockedUnsafeBumpAllocator {
    &LOCKED_ALLOCATOR
}

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod boot;
pub mod config;
pub mod error;
pub mod fs;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod trap;

mod test_framework;

// Re-export for tests
pub use error::{KernelError, KernelResult};
pub use mm::{FrameNumber, PhysicalAddress, VirtualAddress, FRAME_SIZE};
pub use sched::{TaskId, TaskState};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, QemuExitCode, Testable,
};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::entry::arch_panic_handler(info);
    arch::halt()
}

/// Bring every subsystem online in dependency order and hand control to the
/// scheduler. Called once by each architecture's boot shim with a populated,
/// already-validated [`boot::BootInfo`].
///
/// Never returns: once nothing is left ready to run, the idle loop just
/// keeps halting the CPU until the next interrupt.
#[cfg(target_os = "none")]
pub fn kernel_main(info: boot::BootInfo) -> ! {
    arch::entry::arch_early_init();

    boot::validate(&info).expect("boot info failed validation");

    klog::init(log::LevelFilter::Info);

    mm::init(&info).expect("memory management init failed");
    arch::init();
    irq::init().expect("IRQ manager init failed");
    sched::init().expect("scheduler init failed");
    syscall::init();
    fs::init();
    timer::init().expect("timer wheel init failed");
    arch::timer::timer_init(100);
    arch::enable_interrupts();

    kprintln!("[KERNEL] boot complete, entering idle loop");
    loop {
        arch::idle();
    }
}
