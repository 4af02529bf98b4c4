//! Raw 16550 UART driver used for host-visible kernel logging.
//!
//! The teacher talks to the UART through the `uart_16550` crate, which is
//! built on the `x86_64` crate's `Port` type and does not exist for this
//! target. Replaced with the same raw `in`/`out` idiom every other driver
//! in this kernel uses (see [`crate::port`]).

use lazy_static::lazy_static;
use spin::Mutex;

use crate::port::{inb, outb};

const COM1: u16 = 0x3F8;

struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// # Safety
    /// `base` must name a present 16550-compatible UART.
    unsafe fn new(base: u16) -> Self {
        let port = Self { base };
        port.init();
        port
    }

    fn init(&self) {
        // SAFETY: standard 16550 init sequence; disable interrupts, set
        // DLAB, program the divisor for 38400 baud, 8N1, enable FIFO.
        unsafe {
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x80);
            outb(self.base, 0x03);
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03);
            outb(self.base + 2, 0xC7);
            outb(self.base + 4, 0x0B);
        }
    }

    fn is_transmit_empty(&self) -> bool {
        // SAFETY: line-status register read has no side effect beyond
        // clearing the flag it reports.
        (unsafe { inb(self.base + 5) } & 0x20) != 0
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.is_transmit_empty() {}
        // SAFETY: transmit holding register is empty per the poll above.
        unsafe { outb(self.base, byte) };
    }
}

impl core::fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        // SAFETY: 0x3F8 (COM1) is always wired on the target platforms this
        // kernel boots on (real hardware and QEMU alike).
        Mutex::new(unsafe { SerialPort::new(COM1) })
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;

    #[expect(
        clippy::expect_used,
        reason = "Serial port should be correctly initialized."
    )]
    SERIAL1
        .lock()
        .write_fmt(args)
        .expect("Failed to print on serial port.");
}

/// Print to host machine through serial port interface.
#[macro_export]
macro_rules! serial_print {
    ($($args:tt)*) => {
        $crate::serial::_print(format_args!($($args)*));
    };
}

/// Print to host machine through serial port interface a line.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}
