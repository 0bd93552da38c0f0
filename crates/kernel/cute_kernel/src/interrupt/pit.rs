//! Busy-wait delays on channel 2 of the programmable interval timer.

use smp_boot::Delay;
use x86_64::instructions::port::Port;

use crate::sync::SpinLock;

const PIT_HZ: u32 = 1_193_182;
const CHANNEL2_DATA: u16 = 0x42;
const COMMAND: u16 = 0x43;
/// channel 2, lobyte/hibyte, mode 0 (interrupt on terminal count)
const CHANNEL2_ONESHOT: u8 = 0b1011_0000;
/// keyboard controller port B: gate and output of channel 2
const PORT_B: u16 = 0x61;
const PORT_B_GATE: u8 = 1 << 0;
const PORT_B_SPEAKER: u8 = 1 << 1;
const PORT_B_OUT: u8 = 1 << 5;

/// Longest delay the 16-bit counter can count down in one go.
const MAX_CHUNK_MS: u32 = 50;

static PIT: SpinLock<()> = SpinLock::new(());

fn wait_chunk(ms: u32) {
    let count = u16::try_from(PIT_HZ / 1000 * ms).unwrap_or(u16::MAX);
    let mut port_b = Port::<u8>::new(PORT_B);
    let mut command = Port::<u8>::new(COMMAND);
    let mut data = Port::<u8>::new(CHANNEL2_DATA);
    let [lo, hi] = count.to_le_bytes();
    unsafe {
        let b = port_b.read() & !(PORT_B_SPEAKER | PORT_B_GATE);
        port_b.write(b);
        command.write(CHANNEL2_ONESHOT);
        data.write(lo);
        data.write(hi);
        // a rising edge on the gate starts the count.
        port_b.write(b | PORT_B_GATE);
        while port_b.read() & PORT_B_OUT == 0 {
            core::hint::spin_loop();
        }
        port_b.write(b);
    }
}

/// Waits for at least `ms` milliseconds.
pub fn mdelay(ms: u32) {
    let _guard = PIT.lock();
    let mut left = ms;
    while left > 0 {
        let chunk = left.min(MAX_CHUNK_MS);
        wait_chunk(chunk);
        left -= chunk;
    }
}

/// [`Delay`] backed by the PIT.
pub struct Pit;

impl Delay for Pit {
    fn mdelay(&mut self, ms: u32) {
        mdelay(ms);
    }
}
