//! 8259A PIC remap and masking.
//!
//! Grounded on `examples/original_source/kernel/interrupt.c`'s `pic_init`.
//! Real mode wires IRQ0-7 to vectors 0x08-0x0F, which collide with the CPU
//! exception vectors; the standard fix is to remap the master PIC to
//! 0x20-0x27 and the slave to 0x28-0x2F before anything unmasks an IRQ.

use crate::config::{PIC1_COMMAND, PIC1_DATA, PIC1_VECTOR_OFFSET, PIC2_COMMAND, PIC2_DATA, PIC2_VECTOR_OFFSET};
use crate::port::{inb, outb};

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
/// Slave PIC is cascaded on IRQ2 of the master.
const MASTER_CASCADE_IRQ: u8 = 0x04;
const SLAVE_CASCADE_IDENTITY: u8 = 0x02;

/// Master PIC's end-of-interrupt command.
const PIC_EOI: u8 = 0x20;

/// Reprogram both PICs to the vector ranges in `config`, then mask every IRQ
/// line except the timer (IRQ0) and the slave's cascade (IRQ2) — without the
/// cascade unmasked on the master, no IRQ8-15 (keyboard's sibling IDE
/// channels included) can ever reach the CPU. Individual drivers unmask
/// their own line when they register a handler.
pub fn remap() {
    // SAFETY: the four-byte ICW handshake below is the documented 8259A
    // initialization sequence; ports are fixed hardware addresses.
    unsafe {
        let master_mask = inb(PIC1_DATA);
        let slave_mask = inb(PIC2_DATA);

        outb(PIC1_COMMAND, ICW1_INIT);
        outb(PIC2_COMMAND, ICW1_INIT);
        outb(PIC1_DATA, PIC1_VECTOR_OFFSET);
        outb(PIC2_DATA, PIC2_VECTOR_OFFSET);
        outb(PIC1_DATA, MASTER_CASCADE_IRQ);
        outb(PIC2_DATA, SLAVE_CASCADE_IDENTITY);
        outb(PIC1_DATA, ICW4_8086);
        outb(PIC2_DATA, ICW4_8086);

        // Keep whatever lines were already unmasked, except start the timer
        // and the slave's cascade unmasked even on a from-scratch boot (bit 0
        // clear = IRQ0 enabled; bit 2 clear = IRQ2 enabled). Without IRQ2
        // unmasked, nothing behind the slave PIC (keyboard's sibling IDE
        // IRQ14/IRQ15) can ever reach the CPU, no matter what `ide::init`
        // unmasks on the slave itself.
        outb(PIC1_DATA, master_mask & !0x01 & !MASTER_CASCADE_IRQ);
        outb(PIC2_DATA, slave_mask);
    }
}

/// Unmask IRQ line `irq` (0-15).
pub fn unmask(irq: u8) {
    let (port, bit) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    // SAFETY: reading then writing back the PIC's own mask register.
    unsafe {
        let mask = inb(port);
        outb(port, mask & !(1 << bit));
    }
}

/// Mask IRQ line `irq` (0-15).
pub fn mask(irq: u8) {
    let (port, bit) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    // SAFETY: reading then writing back the PIC's own mask register.
    unsafe {
        let mask = inb(port);
        outb(port, mask | (1 << bit));
    }
}

/// Send end-of-interrupt for vector `vec_no`. Vectors below the slave's
/// offset only need to EOI the master; anything from the slave's range
/// needs both, slave first.
pub fn send_eoi(vec_no: u8) {
    // SAFETY: EOI is always safe to send; a spurious extra EOI with nothing
    // in service is a documented no-op on real hardware.
    unsafe {
        if vec_no >= PIC2_VECTOR_OFFSET {
            outb(PIC2_COMMAND, PIC_EOI);
        }
        outb(PIC1_COMMAND, PIC_EOI);
    }
}
