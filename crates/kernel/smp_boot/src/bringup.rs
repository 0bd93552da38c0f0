use arrayvec::ArrayVec;
use cute_kernel_params::{
    ALIVE_TIMEOUT_MS, INIT_SETTLE_MS, IPI_ACK_POLL_INTERVAL_MS, IPI_ACK_POLLS, NCPU,
    SIPI_ATTEMPTS,
};

use crate::{AliveCpus, Apic, CpuInfo, Delay, Ipi, PollBudget, SipiVector, poll_with_timeout};

/// Timing of the INIT-SIPI handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringupConfig {
    /// Wait for the APIC to accept each IPI.
    pub ipi_ack: PollBudget,
    /// Delay between INIT and the first SIPI.
    pub init_settle_ms: u32,
    /// SIPIs sent before the CPU is given up on.
    pub sipi_attempts: u32,
    /// Wait for the started CPU to report itself alive.
    pub alive: PollBudget,
}

impl Default for BringupConfig {
    fn default() -> Self {
        Self {
            ipi_ack: PollBudget {
                polls: IPI_ACK_POLLS,
                interval_ms: IPI_ACK_POLL_INTERVAL_MS,
            },
            init_settle_ms: INIT_SETTLE_MS,
            sipi_attempts: SIPI_ATTEMPTS,
            alive: PollBudget {
                polls: ALIVE_TIMEOUT_MS,
                interval_ms: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BringupError {
    #[error("invalid SIPI start address {0:#x}")]
    InvalidStartVector(u32),
    #[error("too many CPUs: {0}")]
    TooManyCpus(usize),
    #[error("INIT IPI not delivered: apic_id={apic_id}")]
    InitNotDelivered { apic_id: u32 },
    #[error("SIPI not delivered after {attempts} attempts: apic_id={apic_id}")]
    SipiNotDelivered { apic_id: u32, attempts: u32 },
    #[error("CPU did not come up: apic_id={apic_id}")]
    CpuNotAlive { apic_id: u32 },
    #[error("alive CPU count mismatch: expected={expected}, alive={alive}")]
    AliveCountMismatch { expected: usize, alive: usize },
}

/// Outcome of starting one secondary CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBringup {
    pub apic_id: u32,
    /// SIPIs sent until one was accepted.
    pub sipi_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringupReport {
    pub cpus: ArrayVec<CpuBringup, NCPU>,
}

impl BringupReport {
    /// Number of SIPIs that had to be resent.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.cpus.iter().map(|c| c.sipi_attempts - 1).sum()
    }
}

/// Returns the index of the bootstrap CPU in `cpus`, after checking that
/// every CPU fits in the per-CPU table.
///
/// Falls back to the first entry if none is flagged as bootstrap.
pub fn bootstrap_index(cpus: &[CpuInfo]) -> Result<usize, BringupError> {
    if cpus.len() > NCPU {
        return Err(BringupError::TooManyCpus(cpus.len()));
    }
    Ok(cpus.iter().position(|cpu| cpu.bootstrap).unwrap_or(0))
}

/// Starts every non-bootstrap CPU in `cpus`, one at a time.
///
/// The calling CPU is recognized by its bootstrap flag or by its local APIC id.
///
/// `prepare` runs before each CPU is sent INIT, with the CPU's index in
/// `cpus`; it is expected to fill in the trampoline parameters for that CPU.
/// The next CPU is started only after the previous one has incremented
/// `alive`, since they all share the same trampoline page.
pub fn start_secondary_cpus<A, D>(
    apic: &mut A,
    delay: &mut D,
    config: &BringupConfig,
    cpus: &[CpuInfo],
    start: SipiVector,
    alive: &AliveCpus,
    mut prepare: impl FnMut(usize, &CpuInfo),
) -> Result<BringupReport, BringupError>
where
    A: Apic + ?Sized,
    D: Delay + ?Sized,
{
    bootstrap_index(cpus)?;

    let self_id = apic.local_apic_id();
    let mut report = BringupReport::default();
    for (index, cpu) in cpus.iter().enumerate() {
        // never INIT the CPU running this loop.
        if cpu.bootstrap || cpu.apic_id == self_id {
            continue;
        }
        let apic_id = cpu.apic_id;
        prepare(index, cpu);

        let before = alive.count();

        apic.send_ipi(Ipi::init(apic_id));
        if !poll_with_timeout(delay, config.ipi_ack, || apic.ipi_acknowledged()) {
            return Err(BringupError::InitNotDelivered { apic_id });
        }
        delay.mdelay(config.init_settle_ms);

        let mut attempts = 0;
        let delivered = loop {
            if attempts == config.sipi_attempts {
                break false;
            }
            attempts += 1;
            apic.send_ipi(Ipi::startup(apic_id, start));
            if poll_with_timeout(delay, config.ipi_ack, || apic.ipi_acknowledged()) {
                break true;
            }
            log::warn!("SIPI not acknowledged: apic_id={apic_id}, attempt={attempts}");
        };
        if !delivered {
            return Err(BringupError::SipiNotDelivered { apic_id, attempts });
        }

        if !poll_with_timeout(delay, config.alive, || alive.count() > before) {
            return Err(BringupError::CpuNotAlive { apic_id });
        }
        log::info!("CPU started: apic_id={apic_id}, sipi_attempts={attempts}");

        report.cpus.push(CpuBringup {
            apic_id,
            sipi_attempts: attempts,
        });
    }

    let alive = alive.count();
    if alive != cpus.len() {
        return Err(BringupError::AliveCountMismatch {
            expected: cpus.len(),
            alive,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{DeliveryMode, Destination};

    #[derive(Default)]
    struct MockDelay(u64);

    impl Delay for MockDelay {
        fn mdelay(&mut self, ms: u32) {
            self.0 += u64::from(ms);
        }
    }

    /// APIC whose targets come up as soon as a SIPI is accepted.
    #[derive(Default)]
    struct MockApic<'a> {
        alive: Option<&'a AliveCpus>,
        sent: Vec<Ipi>,
        /// Number of SIPIs to drop, per APIC id.
        lost_sipis: HashMap<u32, u32>,
        lost_inits: Vec<u32>,
        silent: Vec<u32>,
        double_report: Vec<u32>,
        acked: bool,
    }

    impl<'a> MockApic<'a> {
        fn new(alive: &'a AliveCpus) -> Self {
            Self {
                alive: Some(alive),
                ..Self::default()
            }
        }

        fn sent_to(&self, apic_id: u32, mode: DeliveryMode) -> usize {
            self.sent
                .iter()
                .filter(|ipi| ipi.mode == mode && ipi.dest == Destination::Physical(apic_id))
                .count()
        }
    }

    impl Apic for MockApic<'_> {
        fn local_apic_id(&self) -> u32 {
            0
        }

        fn send_ipi(&mut self, ipi: Ipi) {
            self.sent.push(ipi);
            let Destination::Physical(id) = ipi.dest else {
                self.acked = true;
                return;
            };
            self.acked = match ipi.mode {
                DeliveryMode::Init => !self.lost_inits.contains(&id),
                DeliveryMode::Startup => match self.lost_sipis.get_mut(&id) {
                    Some(lost) if *lost > 0 => {
                        *lost -= 1;
                        false
                    }
                    _ => true,
                },
                _ => true,
            };
            if ipi.mode == DeliveryMode::Startup && self.acked && !self.silent.contains(&id) {
                let alive = self.alive.unwrap();
                alive.mark_alive();
                if self.double_report.contains(&id) {
                    alive.mark_alive();
                }
            }
        }

        fn ipi_acknowledged(&self) -> bool {
            self.acked
        }
    }

    fn cpus(n: u32) -> Vec<CpuInfo> {
        (0..n)
            .map(|i| CpuInfo {
                apic_id: i * 2,
                bootstrap: i == 0,
            })
            .collect()
    }

    fn start() -> SipiVector {
        SipiVector::new(0x1_0000).unwrap()
    }

    #[test]
    fn starts_all_cpus() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        let mut delay = MockDelay::default();
        let mut prepared = vec![];

        let report = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(4),
            start(),
            &alive,
            |index, _| prepared.push(index),
        )
        .unwrap();

        assert_eq!(alive.count(), 4);
        assert_eq!(prepared, [1, 2, 3]);
        assert_eq!(report.cpus.len(), 3);
        assert_eq!(report.retries(), 0);
        assert_eq!(apic.sent_to(0, DeliveryMode::Init), 0);
        for id in [2, 4, 6] {
            assert_eq!(apic.sent_to(id, DeliveryMode::Init), 1);
            assert_eq!(apic.sent_to(id, DeliveryMode::Startup), 1);
        }
        // INIT settle delay per CPU, nothing else had to wait.
        assert_eq!(delay.0, 3 * u64::from(INIT_SETTLE_MS));
    }

    #[test]
    fn skips_calling_cpu_by_apic_id() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        let mut delay = MockDelay::default();
        let mut list = cpus(3);
        for cpu in &mut list {
            cpu.bootstrap = false;
        }

        let report = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &list,
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap();

        assert_eq!(alive.count(), 3);
        assert_eq!(report.cpus.len(), 2);
        assert_eq!(apic.sent_to(0, DeliveryMode::Init), 0);
        assert_eq!(apic.sent_to(0, DeliveryMode::Startup), 0);
    }

    #[test]
    fn ipis_go_out_in_order() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        let mut delay = MockDelay::default();

        start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(3),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap();

        let modes = apic
            .sent
            .iter()
            .map(|ipi| (ipi.mode, ipi.dest))
            .collect::<Vec<_>>();
        assert_eq!(
            modes,
            [
                (DeliveryMode::Init, Destination::Physical(2)),
                (DeliveryMode::Startup, Destination::Physical(2)),
                (DeliveryMode::Init, Destination::Physical(4)),
                (DeliveryMode::Startup, Destination::Physical(4)),
            ]
        );
        assert!(apic.sent.iter().all(|ipi| ipi.mode != DeliveryMode::Startup
            || ipi.vector == 0x10));
    }

    #[test]
    fn resends_lost_sipi() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        apic.lost_sipis.insert(4, 2);
        let mut delay = MockDelay::default();

        let report = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(3),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap();

        assert_eq!(alive.count(), 3);
        assert_eq!(apic.sent_to(4, DeliveryMode::Startup), 3);
        assert_eq!(
            report.cpus[1],
            CpuBringup {
                apic_id: 4,
                sipi_attempts: 3
            }
        );
        assert_eq!(report.retries(), 2);
    }

    #[test]
    fn gives_up_after_three_sipis() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        apic.lost_sipis.insert(6, u32::MAX);
        let mut delay = MockDelay::default();

        let err = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(4),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(
            err,
            BringupError::SipiNotDelivered {
                apic_id: 6,
                attempts: 3
            }
        );
        assert_eq!(apic.sent_to(6, DeliveryMode::Startup), 3);
        assert_eq!(alive.count(), 3);
        assert!(err.to_string().contains("apic_id=6"));
    }

    #[test]
    fn fails_when_init_is_not_delivered() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        apic.lost_inits.push(2);
        let mut delay = MockDelay::default();

        let err = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(2),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(err, BringupError::InitNotDelivered { apic_id: 2 });
        assert_eq!(apic.sent_to(2, DeliveryMode::Startup), 0);
        assert_eq!(
            delay.0,
            u64::from(IPI_ACK_POLLS) * u64::from(IPI_ACK_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn waits_for_cpu_to_report_alive() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        apic.silent.push(2);
        let mut delay = MockDelay::default();

        let err = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(3),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(err, BringupError::CpuNotAlive { apic_id: 2 });
        assert!(delay.0 >= u64::from(ALIVE_TIMEOUT_MS));
        assert_eq!(apic.sent_to(4, DeliveryMode::Init), 0);
    }

    #[test]
    fn detects_alive_count_mismatch() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        apic.double_report.push(2);
        let mut delay = MockDelay::default();

        let err = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(2),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(
            err,
            BringupError::AliveCountMismatch {
                expected: 2,
                alive: 3
            }
        );
    }

    #[test]
    fn single_cpu_sends_nothing() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        let mut delay = MockDelay::default();

        let report = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(1),
            start(),
            &alive,
            |_, _| panic!("no CPU to prepare"),
        )
        .unwrap();

        assert!(report.cpus.is_empty());
        assert!(apic.sent.is_empty());
        assert_eq!(delay.0, 0);
    }

    #[test]
    fn rejects_too_many_cpus() {
        let alive = AliveCpus::new();
        let mut apic = MockApic::new(&alive);
        let mut delay = MockDelay::default();
        let n = u32::try_from(NCPU).unwrap() + 1;

        let err = start_secondary_cpus(
            &mut apic,
            &mut delay,
            &BringupConfig::default(),
            &cpus(n),
            start(),
            &alive,
            |_, _| {},
        )
        .unwrap_err();

        assert_eq!(err, BringupError::TooManyCpus(NCPU + 1));
        assert!(apic.sent.is_empty());
    }

    #[test]
    fn bootstrap_index_checks_table_size_first() {
        let n = u32::try_from(NCPU).unwrap();
        let mut list = cpus(n + 1);
        list[0].bootstrap = false;
        list[NCPU].bootstrap = true;
        assert_eq!(
            bootstrap_index(&list),
            Err(BringupError::TooManyCpus(NCPU + 1))
        );

        let mut list = cpus(n);
        list[0].bootstrap = false;
        list[3].bootstrap = true;
        assert_eq!(bootstrap_index(&list), Ok(3));

        list[3].bootstrap = false;
        assert_eq!(bootstrap_index(&list), Ok(0));
    }
}
