//! Kernel binary entry point.
//!
//! All of the actual boot logic lives in the `nucleus_kernel` lib crate:
//! the x86_64 entry point is generated by `bootloader_api::entry_point!`
//! inside `arch::x86_64::boot`, and the aarch64 entry point is the
//! `_start` symbol exported from `arch::aarch64::boot`. Linking
//! against the lib crate is enough to pull both in; this binary exists
//! only because `bootloader_api` and the aarch64 linker script each expect
//! to produce a standalone executable.
#![no_std]
#![no_main]

extern crate nucleus_kernel;
