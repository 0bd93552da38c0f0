//! Requests to the Limine bootloader and accessors for its responses.
//!
//! Responses live in bootloader-reclaimable memory, which is never reclaimed.

use alloc::vec::Vec;

use limine::{
    BaseRevision,
    memory_map::EntryType,
    request::{HhdmRequest, MemoryMapRequest, MpRequest, RequestsEndMarker, RequestsStartMarker},
};
use smp_boot::CpuInfo;

#[used]
#[unsafe(link_section = ".requests_start_marker")]
static REQUESTS_START: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[unsafe(link_section = ".requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".requests")]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static MP_REQUEST: MpRequest = MpRequest::new();

#[used]
#[unsafe(link_section = ".requests_end_marker")]
static REQUESTS_END: RequestsEndMarker = RequestsEndMarker::new();

/// Checks that everything the kernel needs was provided.
///
/// Panics otherwise; there is nothing to fall back to this early.
pub fn init() {
    assert!(
        BASE_REVISION.is_supported(),
        "limine base revision not supported"
    );
    assert!(HHDM_REQUEST.get_response().is_some(), "no HHDM response");
    assert!(MP_REQUEST.get_response().is_some(), "no MP response");
}

/// Offset of the higher-half direct map.
pub fn hhdm_offset() -> u64 {
    HHDM_REQUEST
        .get_response()
        .map_or(0, |hhdm| hhdm.offset())
}

/// Physical memory regions free for the kernel, as `(base, length)`.
pub fn usable_regions() -> impl Iterator<Item = (u64, u64)> {
    MEMORY_MAP_REQUEST
        .get_response()
        .into_iter()
        .flat_map(|map| map.entries())
        .filter(|entry| entry.entry_type == EntryType::USABLE)
        .map(|entry| (entry.base, entry.length))
}

/// Every CPU in the machine, as reported by the bootloader.
pub fn cpus() -> Vec<CpuInfo> {
    let Some(mp) = MP_REQUEST.get_response() else {
        return Vec::new();
    };
    let bsp = mp.bsp_lapic_id();
    mp.cpus()
        .iter()
        .map(|cpu| CpuInfo {
            apic_id: cpu.lapic_id,
            bootstrap: cpu.lapic_id == bsp,
        })
        .collect()
}
