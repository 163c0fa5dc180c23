// Global Descriptor Table and Task State Segment.

use lazy_static::lazy_static;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const STACK_SIZE: usize = 4096 * 5;

/// Carves out a statically-allocated, 16-byte-aligned stack and returns its
/// top address. The x86_64 ABI (movaps and friends) requires 16-byte
/// alignment at entry; `#[repr(align(16))]` on the backing array is what
/// guarantees it, the raw-pointer dance is just to avoid ever forming a
/// `&mut` to the `static`.
fn new_stack_top() -> VirtAddr {
    #[repr(align(16))]
    struct AlignedStack([u8; STACK_SIZE]);
    static STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);

    VirtAddr::from_ptr(&raw const STACK) + STACK_SIZE as u64
}

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        // RSP0: stack used on a ring3 -> ring0 transition (syscalls, interrupts).
        tss.privilege_stack_table[0] = new_stack_top();
        // IST1: separate stack for double faults, so a stack overflow that
        // trips one doesn't also corrupt the handler trying to report it.
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = new_stack_top();
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment()); // 0x08
        let data_selector = gdt.append(Descriptor::kernel_data_segment()); // 0x10
        let tss_selector = gdt.append(Descriptor::tss_segment(&TSS)); // 0x18 (2 entries)
        let user_data_selector = gdt.append(Descriptor::user_data_segment()); // 0x28 (RPL3 = 0x2B)
        let user_code_selector = gdt.append(Descriptor::user_code_segment()); // 0x30 (RPL3 = 0x33)
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                tss_selector,
                user_data_selector,
                user_code_selector,
            },
        )
    };
}

/// GDT segment selectors.
///
/// User data precedes user code so SYSRET's packed layout works out:
/// SYSRET sets SS = STAR[63:48]+8, CS = STAR[63:48]+16.
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
    pub user_data_selector: SegmentSelector,
    pub user_code_selector: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS};
    use x86_64::instructions::tables::load_tss;

    GDT.0.load();
    // SAFETY: the selectors come from the GDT we just loaded, so CS/DS/TSS
    // all reference valid descriptors in the now-active table.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
}

/// Must only be called after [`init`].
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Updates RSP0 in the TSS. Called on every context switch so the next
/// ring3 -> ring0 transition lands on the new task's kernel stack.
///
/// # Safety
/// Caller must hold interrupts disabled; a timer tick landing between the
/// raw write and its use would see a half-updated TSS.
pub fn set_kernel_stack(stack_top: u64) {
    // SAFETY: TSS is a 'static initialized during boot; the raw pointer
    // cast avoids requiring `&mut TSS`, which lazy_static never hands out.
    unsafe {
        let tss_ptr = &raw const *TSS as *mut TaskStateSegment;
        (*tss_ptr).privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

pub fn get_kernel_stack() -> u64 {
    TSS.privilege_stack_table[0].as_u64()
}
