// AArch64 boot code - matches x86_64 pattern

use core::arch::naked_asm;

use crate::boot::{BootInfo, MemoryMapEntry, MemoryRegionKind, ARCH_AARCH64};

/// QEMU's `virt` machine always puts RAM at this physical base; there is no
/// firmware table in this tree to read the actual size back from, so this
/// reports a conservative 128 MiB window regardless of `-m`.
const VIRT_RAM_BASE: u64 = 0x4000_0000;
const VIRT_RAM_SIZE: u64 = 128 * 1024 * 1024;

/// First instruction executed, per `link.ld`'s `ENTRY(_start)`. No Rust
/// runtime exists yet -- no stack, no relocated statics -- so this has to be
/// a naked stub rather than an ordinary `extern "C" fn`: it drops to EL1 if
/// QEMU handed control over at EL2, points `sp` at the stack `link.ld`
/// reserves, and only then calls into normal Rust code.
#[unsafe(naked)]
#[no_mangle]
#[link_section = ".text.boot"]
pub unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "msr daifset, #0xf", // mask all exceptions until vectors are installed
        "mrs x0, CurrentEL",
        "lsr x0, x0, #2",
        "cmp x0, #2",
        "b.ne 1f",
        // Running at EL2 (QEMU's virt with no secure firmware sometimes
        // lands here): drop straight to EL1h with exceptions still masked.
        "mov x0, #0x80000000", // HCR_EL2.RW -- EL1 runs in AArch64
        "msr hcr_el2, x0",
        "mov x0, #0x3c5", // SPSR_EL2: EL1h, DAIF all set
        "msr spsr_el2, x0",
        "adr x0, 1f",
        "msr elr_el2, x0",
        "eret",
        "1:",
        "adrp x0, __stack_top",
        "add x0, x0, :lo12:__stack_top",
        "mov sp, x0",
        "bl {entry}",
        "b .",
        entry = sym start_rust,
    );
}

extern "C" fn start_rust() -> ! {
    // BSS symbols from linker script
    extern "C" {
        static mut __bss_start: u8;
        static mut __bss_end: u8;
    }

    unsafe {
        let bss_start = &raw mut __bss_start;
        let bss_end = &raw mut __bss_end;
        let bss_size = bss_end as usize - bss_start as usize;
        core::ptr::write_bytes(bss_start, 0, bss_size);
    }

    let mut info = BootInfo::new(ARCH_AARCH64);
    info.push_region(MemoryMapEntry {
        base: VIRT_RAM_BASE,
        length: VIRT_RAM_SIZE,
        kind: MemoryRegionKind::Usable,
    });

    crate::kernel_main(info)
}
