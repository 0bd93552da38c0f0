//! Periodic report of per-thread scheduler counters.

use core::fmt;

use mlfq::{Placement, Scheduler};

use super::ThreadArch;
use crate::{param::SCHED_STATS_INTERVAL, println};

struct Where(Placement);

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Placement::OnCpu(p) => write!(f, "on_cpu@{p}"),
            Placement::Active(p) => write!(f, "active@{p}"),
            Placement::Expired(p) => write!(f, "expired@{p}"),
            Placement::JustQueued => f.write_str("just_queued"),
        }
    }
}

/// Prints every thread of `sched` once per [`SCHED_STATS_INTERVAL`] ticks.
pub(super) fn report_if_due(cpu_id: usize, sched: &Scheduler<ThreadArch>) {
    if sched.ticks() % SCHED_STATS_INTERVAL != 0 {
        return;
    }

    let queues = sched.queue_lengths();
    println!(
        "CPU#{cpu_id} sched stats: ticks={}, active={}, expired={}, just_queued={}",
        sched.ticks(),
        queues.active,
        queues.expired,
        queues.just_queued,
    );
    for (placement, thread) in sched.threads() {
        let stats = thread.stats();
        println!(
            "  {:>4} {:<16} {} slice={} runtime={} dispatched={} avg_wait={} slice_end={} high_prio={} prio_map=[{}]",
            thread.id(),
            thread.arch().name(),
            Where(placement),
            thread.slice_ticks(),
            stats.runtime_overall,
            stats.dispatch_count,
            stats.average_wait(),
            stats.preempt_slice_end,
            stats.preempt_high_prio,
            stats.prio_histogram(),
        );
    }
}
