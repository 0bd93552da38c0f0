//! Console output, to the serial port.

pub mod logger;
pub mod print;
pub mod uart;

/// Sends one character to the serial port.
///
/// Line feeds are preceded by a carriage return.
pub fn put_char(c: char) {
    let mut buf = [0; 4];
    for &b in c.encode_utf8(&mut buf).as_bytes() {
        if b == b'\n' {
            uart::putc_sync(b'\r');
        }
        uart::putc_sync(b);
    }
}

/// Initializes the serial port and the logger.
pub fn init() {
    uart::init();
    logger::init();
}
