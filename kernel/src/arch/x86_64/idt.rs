// Interrupt Descriptor Table

use core::arch::naked_asm;

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::VirtAddr;

use crate::trap::{TrapFrame, TrapKind};

/// Software interrupt vector userspace-less code still uses to reach the
/// syscall gateway, matching the traditional `int 0x80` convention.
const SYSCALL_VECTOR: u8 = 0x80;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        // IRQ0 = interrupt 32, per the PIC remap in arch::x86_64::pic::IRQ_BASE.
        idt[32].set_handler_fn(timer_interrupt_handler);
        unsafe {
            idt[SYSCALL_VECTOR as usize].set_handler_addr(VirtAddr::new(syscall_int80_entry as u64));
        }
        idt
    };
}

#[allow(dead_code)]
pub fn init() {
    IDT.load();
}

fn sync_fault_frame(stack_frame: &InterruptStackFrame, info: u64) -> TrapFrame {
    let mut frame = TrapFrame::empty();
    frame.pc = stack_frame.instruction_pointer.as_u64();
    frame.sp = stack_frame.stack_pointer.as_u64();
    frame.flags = stack_frame.cpu_flags.bits();
    frame.info = info;
    frame
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let fault_addr = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    let mut frame = sync_fault_frame(&stack_frame, error_code.bits());
    frame.registers[0] = fault_addr;
    crate::trap::handle_trap(TrapKind::SyncFault, &mut frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    let mut frame = sync_fault_frame(&stack_frame, error_code);
    crate::trap::handle_trap(TrapKind::SyncFault, &mut frame);
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::arch::x86_64::timer::tick();
    crate::arch::x86_64::pic::send_eoi(0);
}

/// Argument block built on the stack by [`syscall_int80_entry`] and read back
/// by [`syscall_int80_handler`] through a single pointer, rather than
/// threading seven values through SysV's six integer argument registers.
#[repr(C)]
struct RawSyscallArgs {
    number: usize,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
}

/// Captures the syscall number (`rax`) and its six arguments in the
/// `syscall`-instruction register convention (`rdi, rsi, rdx, r10, r8, r9`,
/// not SysV's `rdi, rsi, rdx, rcx, r8, r9`, since the caller side of this
/// gateway is written to that convention too), calls into the gateway, and
/// leaves the `i64` result in `rax`. Built as a raw IDT gate rather than an
/// `extern "x86-interrupt"` fn because that ABI exposes no general-purpose
/// registers, which is exactly where a syscall's arguments travel.
///
/// Seven pushes (an odd count) is deliberate: entry to an interrupt gate
/// with no privilege-level change leaves `rsp % 16 == 8`, so an odd number
/// of 8-byte pushes is what restores the 16-byte alignment SysV requires at
/// the `call` below.
#[unsafe(naked)]
extern "C" fn syscall_int80_entry() -> ! {
    naked_asm!(
        "push r9",  // a5
        "push r8",  // a4
        "push r10", // a3
        "push rdx", // a2
        "push rsi", // a1
        "push rdi", // a0
        "push rax", // number
        "mov rdi, rsp",
        "call {handler}",
        "add rsp, 56",
        "iretq",
        handler = sym syscall_int80_handler,
    );
}

extern "C" fn syscall_int80_handler(args: *const RawSyscallArgs) -> i64 {
    // SAFETY: `syscall_int80_entry` just built this block on its own stack
    // frame and passes a pointer to it; it is valid for the duration of
    // this call.
    let args = unsafe { &*args };
    crate::syscall::dispatch(args.number, args.a0, args.a1, args.a2, args.a3, args.a4, args.a5)
}
