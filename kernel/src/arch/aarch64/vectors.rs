//! AArch64 exception vector table (C3).
//!
//! Installs `VBAR_EL1` so synchronous exceptions (`svc`, faults) and IRQs
//! taken while the kernel runs at EL1 funnel into [`crate::trap::handle_trap`],
//! the same dispatch table x86_64's IDT stubs (`arch::x86_64::idt`) target.
//! Only the "current EL, SPx" vectors are wired to real handling -- this
//! kernel never drops to EL0, so the other three groups (SP0, lower EL
//! AArch64, lower EL AArch32) can only be reached by a bug and are routed to
//! a shared panic stub.

use core::arch::global_asm;

use crate::trap::{handle_trap, TrapFrame, TrapKind};

/// `ESR_EL1.EC` value for an `svc` taken from AArch64 state.
const EC_SVC64: u64 = 0x15;

global_asm!(
    r#"
.macro SAVE_CONTEXT
    sub sp, sp, #288
    stp x0, x1, [sp, #0]
    stp x2, x3, [sp, #16]
    stp x4, x5, [sp, #32]
    stp x6, x7, [sp, #48]
    stp x8, x9, [sp, #64]
    stp x10, x11, [sp, #80]
    stp x12, x13, [sp, #96]
    stp x14, x15, [sp, #112]
    stp x16, x17, [sp, #128]
    stp x18, x19, [sp, #144]
    stp x20, x21, [sp, #160]
    stp x22, x23, [sp, #176]
    stp x24, x25, [sp, #192]
    stp x26, x27, [sp, #208]
    stp x28, x29, [sp, #224]
    str x30, [sp, #240]
    add x9, sp, #288
    str x9, [sp, #248]
    mrs x9, elr_el1
    str x9, [sp, #256]
    mrs x9, spsr_el1
    str x9, [sp, #264]
.endm

.macro RESTORE_CONTEXT
    ldr x9, [sp, #256]
    msr elr_el1, x9
    ldr x9, [sp, #264]
    msr spsr_el1, x9
    ldp x0, x1, [sp, #0]
    ldp x2, x3, [sp, #16]
    ldp x4, x5, [sp, #32]
    ldp x6, x7, [sp, #48]
    ldp x8, x9, [sp, #64]
    ldp x10, x11, [sp, #80]
    ldp x12, x13, [sp, #96]
    ldp x14, x15, [sp, #112]
    ldp x16, x17, [sp, #128]
    ldp x18, x19, [sp, #144]
    ldp x20, x21, [sp, #160]
    ldp x22, x23, [sp, #176]
    ldp x24, x25, [sp, #192]
    ldp x26, x27, [sp, #208]
    ldp x28, x29, [sp, #224]
    ldr x30, [sp, #240]
    add sp, sp, #288
.endm

.balign 0x800
.global vector_table_aarch64
vector_table_aarch64:
    // Current EL, SP0
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    // Current EL, SPx -- the only group this kernel ever actually takes
    .balign 0x80
    b vector_sync_el1h
    .balign 0x80
    b vector_irq_el1h
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    // Lower EL, AArch64
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    // Lower EL, AArch32
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected
    .balign 0x80
    b vector_unexpected

vector_sync_el1h:
    SAVE_CONTEXT
    mrs x0, esr_el1
    str x0, [sp, #272]
    mov x0, sp
    bl {sync_handler}
    RESTORE_CONTEXT
    eret

vector_irq_el1h:
    SAVE_CONTEXT
    mov x0, sp
    bl {irq_handler}
    RESTORE_CONTEXT
    eret

vector_unexpected:
    SAVE_CONTEXT
    mov x0, sp
    bl {unexpected_handler}
    RESTORE_CONTEXT
    eret
"#,
    sync_handler = sym sync_handler,
    irq_handler = sym irq_handler,
    unexpected_handler = sym unexpected_handler,
);

extern "C" {
    static vector_table_aarch64: u8;
}

/// Point `VBAR_EL1` at the table built above. Must run before interrupts
/// are unmasked.
pub fn init() {
    let addr = &raw const vector_table_aarch64 as u64;
    // SAFETY: vector_table_aarch64 is a 2KB-aligned static table emitted by
    // the global_asm! block above, valid for the life of the kernel image.
    unsafe {
        core::arch::asm!("msr vbar_el1, {0}", "isb", in(reg) addr, options(nostack, preserves_flags));
    }
}

extern "C" fn sync_handler(frame: *mut TrapFrame) {
    // SAFETY: built by vector_sync_el1h immediately before this call, on
    // the exception stack, and not touched by anything else concurrently.
    let frame = unsafe { &mut *frame };
    let ec = (frame.info >> 26) & 0x3f;
    if ec == EC_SVC64 {
        // elr_el1 points at the `svc` itself; advance past it so eret
        // doesn't re-execute the same syscall forever.
        frame.pc += 4;
        frame.info = frame.registers[8]; // x8 carries the syscall number
        handle_trap(TrapKind::Syscall, frame);
    } else {
        handle_trap(TrapKind::SyncFault, frame);
    }
}

extern "C" fn irq_handler(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    let Some(irq) = super::gic::handle_irq() else {
        return;
    };
    if irq == super::gic::TIMER_PPI {
        super::timer::tick();
        super::gic::eoi(irq);
    } else {
        frame.info = irq as u64;
        handle_trap(TrapKind::Irq, frame);
    }
}

extern "C" fn unexpected_handler(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    handle_trap(TrapKind::Fiq, frame);
}
