//! Polled driver for the 16550 UART on COM1.

use x86_64::instructions::port::Port;

const COM1: u16 = 0x3f8;

// register offsets from COM1.
// some have different meanings for
// read vs write.

/// transmit holding register (for output bytes)
const THR: u16 = 0;
/// interrupt enable register
const IER: u16 = 1;
/// divisor latch, low byte (with LCR_BAUD_LATCH)
const DLL: u16 = 0;
/// divisor latch, high byte (with LCR_BAUD_LATCH)
const DLM: u16 = 1;
/// FIFO control register
const FCR: u16 = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
/// clear the content of the two FIFOs
const FCR_FIFO_CLEAR: u8 = 3 << 1;
/// line control register
const LCR: u16 = 3;
const LCR_EIGHT_BITS: u8 = 3;
/// special mode to set baud rate
const LCR_BAUD_LATCH: u8 = 1 << 7;
/// line status register
const LSR: u16 = 5;
/// THR can accept another character to send
const LSR_TX_IDLE: u8 = 1 << 5;

fn port(offset: u16) -> Port<u8> {
    Port::new(COM1 + offset)
}

pub fn init() {
    unsafe {
        // disable interrupts.
        port(IER).write(0x00);

        // special mode to set baud rate.
        port(LCR).write(LCR_BAUD_LATCH);

        // 115.2K baud.
        port(DLL).write(0x01);
        port(DLM).write(0x00);

        // leave set-baud mode,
        // and set word length to 8 bits, no parity.
        port(LCR).write(LCR_EIGHT_BITS);

        // reset and enable FIFOs.
        port(FCR).write(FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    }
}

/// Sends one byte, spinning until the transmitter is ready.
///
/// Takes no lock, so it can be used while panicking.
pub fn putc_sync(c: u8) {
    unsafe {
        while port(LSR).read() & LSR_TX_IDLE == 0 {
            core::hint::spin_loop();
        }
        port(THR).write(c);
    }
}
