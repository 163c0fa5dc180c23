//! 8259 Programmable Interrupt Controller driver.
//!
//! Legacy dual-PIC setup: master at 0x20/0x21, slave cascaded on IRQ2 at
//! 0xA0/0xA1. `init()` remaps both PICs past the CPU exception range
//! (vectors 0-31) and masks every line; [`crate::irq`] unmasks individual
//! lines as drivers register for them.

use x86_64::instructions::port::Port;

use crate::error::KernelResult;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const PIC_EOI: u8 = 0x20;

/// Vector the master PIC's IRQ0 is remapped to.
pub const IRQ_BASE: u8 = 32;

/// Remap both PICs and mask every line.
pub fn init() {
    // SAFETY: port writes to the 8259's command/data registers, following the
    // standard ICW1-ICW4 initialization sequence. All interrupts end up
    // masked (0xFF) so nothing fires before handlers are ready to unmask it.
    unsafe {
        let mut pic1_cmd = Port::<u8>::new(PIC1_COMMAND);
        let mut pic1_data = Port::<u8>::new(PIC1_DATA);
        let mut pic2_cmd = Port::<u8>::new(PIC2_COMMAND);
        let mut pic2_data = Port::<u8>::new(PIC2_DATA);

        pic1_cmd.write(0x11);
        pic2_cmd.write(0x11);

        pic1_data.write(IRQ_BASE);
        pic2_data.write(IRQ_BASE + 8);

        pic1_data.write(4); // tell master PIC: slave lives on IRQ2
        pic2_data.write(2); // tell slave PIC its cascade identity

        pic1_data.write(0x01);
        pic2_data.write(0x01);

        pic1_data.write(0xFF);
        pic2_data.write(0xFF);
    }
}

fn mask_register(irq: u8) -> (u16, u8) {
    if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    }
}

/// Mask (disable) a single IRQ line.
pub fn mask_irq(irq: u8) -> KernelResult<()> {
    let (port, bit) = mask_register(irq);
    // SAFETY: read-modify-write of the PIC's own OCW1 mask register.
    unsafe {
        let mut data: Port<u8> = Port::new(port);
        let mask = data.read() | (1 << bit);
        data.write(mask);
    }
    Ok(())
}

/// Unmask (enable) a single IRQ line.
pub fn unmask_irq(irq: u8) -> KernelResult<()> {
    let (port, bit) = mask_register(irq);
    // SAFETY: read-modify-write of the PIC's own OCW1 mask register.
    unsafe {
        let mut data: Port<u8> = Port::new(port);
        let mask = data.read() & !(1 << bit);
        data.write(mask);
    }
    Ok(())
}

/// Acknowledge an IRQ. Slave-PIC IRQs (8-15) need the slave acknowledged
/// first, then the master, since the slave's output is itself wired to the
/// master's IRQ2 input.
pub fn send_eoi(irq: u8) {
    // SAFETY: writing the EOI command byte to the command port(s) is the
    // documented way to end-of-interrupt an 8259.
    unsafe {
        if irq >= 8 {
            Port::<u8>::new(PIC2_COMMAND).write(PIC_EOI);
        }
        Port::<u8>::new(PIC1_COMMAND).write(PIC_EOI);
    }
}
