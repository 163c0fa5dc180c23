//! Exception vectors & context save/restore (C3).
//!
//! Each architecture's entry stub (`arch::x86_64::idt`, `arch::aarch64::vectors`)
//! saves a full [`TrapFrame`], classifies what happened, and calls
//! [`handle_trap`]. This module owns the one dispatch table everything
//! funnels through; the entry stubs own nothing but "build a frame, call
//! here, restore from the frame".

/// What kind of control transfer produced a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// A synchronous fault: page fault, general protection fault, illegal
    /// instruction, alignment fault, etc.
    SyncFault,
    /// An external interrupt routed through the interrupt controller.
    Irq,
    /// A system call instruction (`syscall`/`svc`).
    Syscall,
    /// A high-priority interrupt line with no software equivalent on every
    /// target; treated identically to a fault here since nothing in this
    /// core arms one.
    Fiq,
}

/// Every general-purpose register, SP, PC, and flags, saved in full
/// regardless of whether a given handler examines them. The entry stub
/// writes every field via explicit stores (never a whole-struct move) so
/// the compiler never emits an instruction touching a register the stub
/// has not saved yet.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    pub registers: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub flags: u64,
    /// IRQ line number, syscall number, or fault syndrome, depending on
    /// `kind`; populated by the entry stub before the call.
    pub info: u64,
}

impl TrapFrame {
    pub const fn empty() -> Self {
        Self {
            registers: [0; 31],
            sp: 0,
            pc: 0,
            flags: 0,
            info: 0,
        }
    }
}

/// Dispatch a trapped control transfer. Unhandled kinds fall through to
/// [`fault_panic`], which never returns.
pub fn handle_trap(kind: TrapKind, frame: &mut TrapFrame) {
    match kind {
        TrapKind::Irq => {
            let irq = crate::irq::IrqNumber::new(frame.info as u32);
            #[cfg(feature = "alloc")]
            crate::irq::dispatch(irq);
            let _ = crate::irq::irq_eoi(irq);
        }
        TrapKind::Syscall => {
            let result = crate::syscall::dispatch(
                frame.info as usize,
                frame.registers[0] as usize,
                frame.registers[1] as usize,
                frame.registers[2] as usize,
                frame.registers[3] as usize,
                frame.registers[4] as usize,
                frame.registers[5] as usize,
            );
            frame.registers[0] = result as u64;
        }
        TrapKind::SyncFault | TrapKind::Fiq => fault_panic(kind, frame),
    }
}

fn fault_panic(kind: TrapKind, frame: &TrapFrame) -> ! {
    crate::kprintln!(
        "[TRAP] unhandled {:?}: pc={:#x} sp={:#x} info={:#x}",
        kind,
        frame.pc,
        frame.sp,
        frame.info
    );
    panic!("unhandled trap");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_result_is_written_into_return_register() {
        let mut frame = TrapFrame::empty();
        frame.info = 9999; // unknown syscall number -> -ENOSYS
        handle_trap(TrapKind::Syscall, &mut frame);
        assert_eq!(frame.registers[0] as i64, -38); // -ENOSYS
    }
}
