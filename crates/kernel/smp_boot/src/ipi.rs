use bitflags::bitflags;
use cute_kernel_params::{SIPI_START_MAX, SIPI_START_MIN};

use crate::{AliveCpus, BringupError};

/// Local APIC operations used to talk to other CPUs.
pub trait Apic {
    /// APIC id of the calling CPU.
    fn local_apic_id(&self) -> u32;

    /// Sends `ipi` through the interrupt command register.
    fn send_ipi(&mut self, ipi: Ipi);

    /// Returns `true` once the last IPI has been accepted for delivery.
    fn ipi_acknowledged(&self) -> bool;
}

/// ICR delivery mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
#[repr(u32)]
pub enum DeliveryMode {
    Fixed = 0b000,
    LowestPriority = 0b001,
    Smi = 0b010,
    Nmi = 0b100,
    Init = 0b101,
    Startup = 0b110,
}

/// Target of an IPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A single CPU, by APIC id.
    Physical(u32),
    SelfOnly,
    All,
    AllButSelf,
}

bitflags! {
    /// Flag bits of the ICR low doubleword.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IcrFlags: u32 {
        const LOGICAL = 1 << 11;
        const DELIVERY_PENDING = 1 << 12;
        const LEVEL_ASSERT = 1 << 14;
        const TRIGGER_LEVEL = 1 << 15;
    }
}

const ICR_MODE_SHIFT: u32 = 8;
const ICR_SHORTHAND_SHIFT: u32 = 18;
const ICR_DEST_SHIFT: u32 = 24;

/// Interrupt command register image.
///
/// Writing `low` sends the IPI, so `high` has to be written first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icr {
    pub low: u32,
    pub high: u32,
}

/// An inter-processor interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipi {
    pub mode: DeliveryMode,
    pub dest: Destination,
    pub vector: u8,
}

impl Ipi {
    /// INIT to a single CPU.
    #[must_use]
    pub const fn init(apic_id: u32) -> Self {
        Self {
            mode: DeliveryMode::Init,
            dest: Destination::Physical(apic_id),
            vector: 0,
        }
    }

    /// STARTUP to a single CPU.
    #[must_use]
    pub const fn startup(apic_id: u32, start: SipiVector) -> Self {
        Self {
            mode: DeliveryMode::Startup,
            dest: Destination::Physical(apic_id),
            vector: start.0,
        }
    }

    /// Maskable interrupt at `vector`.
    #[must_use]
    pub const fn fixed(dest: Destination, vector: u8) -> Self {
        Self {
            mode: DeliveryMode::Fixed,
            dest,
            vector,
        }
    }

    /// Encodes the IPI as physical-destination, edge-triggered, asserted.
    #[must_use]
    pub fn icr(&self) -> Icr {
        let (shorthand, dest) = match self.dest {
            Destination::Physical(id) => (0, id),
            Destination::SelfOnly => (1, 0),
            Destination::All => (2, 0),
            Destination::AllButSelf => (3, 0),
        };
        let low = u32::from(self.vector)
            | (self.mode as u32) << ICR_MODE_SHIFT
            | IcrFlags::LEVEL_ASSERT.bits()
            | shorthand << ICR_SHORTHAND_SHIFT;
        Icr {
            low,
            high: dest << ICR_DEST_SHIFT,
        }
    }
}

/// Page number of a SIPI start address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipiVector(u8);

impl SipiVector {
    /// Validates a real-mode start address.
    ///
    /// The address must be 4KiB aligned and inside the low memory window
    /// reachable by a SIPI.
    pub fn new(start: u32) -> Result<Self, BringupError> {
        if start & 0xfff != 0 || !(SIPI_START_MIN..=SIPI_START_MAX).contains(&start) {
            return Err(BringupError::InvalidStartVector(start));
        }
        u8::try_from(start >> 12)
            .map(Self)
            .map_err(|_| BringupError::InvalidStartVector(start))
    }

    #[must_use]
    pub const fn vector(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn start_address(self) -> u32 {
        (self.0 as u32) << 12
    }
}

/// Asks every other CPU to halt.
///
/// Sent as a fixed interrupt, so a CPU running with interrupts disabled
/// takes it only once it enables them again. Does nothing while the caller
/// is the only CPU alive. Returns `true` if the IPI went out.
pub fn broadcast_halt<A>(apic: &mut A, alive: &AliveCpus, vector: u8) -> bool
where
    A: Apic + ?Sized,
{
    if alive.count() <= 1 {
        return false;
    }
    apic.send_ipi(Ipi::fixed(Destination::AllButSelf, vector));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<Ipi>);

    impl Apic for Recorder {
        fn local_apic_id(&self) -> u32 {
            0
        }

        fn send_ipi(&mut self, ipi: Ipi) {
            self.0.push(ipi);
        }

        fn ipi_acknowledged(&self) -> bool {
            true
        }
    }

    #[test]
    fn init_targets_one_cpu() {
        let icr = Ipi::init(3).icr();
        assert_eq!(icr.high, 3 << 24);
        assert_eq!(icr.low, 0x0000_4500);
        assert!(!IcrFlags::from_bits_truncate(icr.low).contains(IcrFlags::DELIVERY_PENDING));
    }

    #[test]
    fn startup_carries_page_number() {
        let start = SipiVector::new(0x1_0000).unwrap();
        assert_eq!(start.vector(), 0x10);
        assert_eq!(start.start_address(), 0x1_0000);

        let icr = Ipi::startup(1, start).icr();
        assert_eq!(icr.low, 0x0000_4610);
        assert_eq!(icr.high, 1 << 24);
    }

    #[test]
    fn broadcast_uses_shorthand() {
        let icr = Ipi::fixed(Destination::AllButSelf, 0xf1).icr();
        assert_eq!(icr.low, 0x000c_40f1);
        assert_eq!(icr.high, 0);
        assert_eq!(
            DeliveryMode::from_repr((icr.low >> 8) & 0b111),
            Some(DeliveryMode::Fixed)
        );
    }

    #[test]
    fn sipi_start_must_be_aligned_low_memory() {
        assert_eq!(
            SipiVector::new(0x1_0800),
            Err(BringupError::InvalidStartVector(0x1_0800))
        );
        assert_eq!(
            SipiVector::new(0x8000),
            Err(BringupError::InvalidStartVector(0x8000))
        );
        assert_eq!(
            SipiVector::new(0xa_0000),
            Err(BringupError::InvalidStartVector(0xa_0000))
        );
        assert!(SipiVector::new(0x9_0000).is_ok());
    }

    #[test]
    fn halt_is_broadcast_only_with_other_cpus_alive() {
        let alive = AliveCpus::new();
        let mut apic = Recorder::default();
        assert!(!broadcast_halt(&mut apic, &alive, 0xf1));
        assert!(apic.0.is_empty());

        alive.mark_alive();
        assert!(broadcast_halt(&mut apic, &alive, 0xf1));
        assert_eq!(apic.0, [Ipi::fixed(Destination::AllButSelf, 0xf1)]);
    }
}
