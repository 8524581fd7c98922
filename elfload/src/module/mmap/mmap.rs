use std::sync::Arc;

use anyhow::Result;
use plain::Plain;

use crate::{
    core::{
        probe::{Event, Monitor},
        resolve::{Enhancers, PerfResolveModule},
    },
    events::AnalysisRecord,
    helpers::raw::parse_raw,
};

const MMAP_PROBE: &str = include_str!("bpf/mmap.bpf.c");

/// Please keep in sync with its BPF counterpart.
#[derive(Default)]
#[repr(C)]
struct MmapEvent {
    timestamp: u64,
    pid: u32,
    tid: u32,
    addr: u64,
    len: u64,
    prot: u64,
    flags: u64,
    anonymous: u8,
    pad: [u8; 7],
}

unsafe impl Plain for MmapEvent {}

const PROT_FLAGS: &[(i32, &str)] = &[
    (libc::PROT_READ, "PROT_READ"),
    (libc::PROT_WRITE, "PROT_WRITE"),
    (libc::PROT_EXEC, "PROT_EXEC"),
];

const MAP_FLAGS: &[(i32, &str)] = &[
    (libc::MAP_SHARED, "MAP_SHARED"),
    (libc::MAP_PRIVATE, "MAP_PRIVATE"),
    (libc::MAP_FIXED, "MAP_FIXED"),
    (libc::MAP_ANONYMOUS, "MAP_ANONYMOUS"),
    (libc::MAP_DENYWRITE, "MAP_DENYWRITE"),
    (libc::MAP_NORESERVE, "MAP_NORESERVE"),
    (libc::MAP_POPULATE, "MAP_POPULATE"),
    (libc::MAP_STACK, "MAP_STACK"),
    (libc::MAP_FIXED_NOREPLACE, "MAP_FIXED_NOREPLACE"),
];

/// Format a flags value using the known flag names. Unknown bits are shown
/// as an hexadecimal remainder.
fn flags_to_string(value: u64, known: &[(i32, &str)], none: &str) -> String {
    let mut rem = value;
    let mut names = known
        .iter()
        .filter(|(flag, _)| {
            let flag = *flag as u64;
            value & flag == flag && flag != 0
        })
        .map(|(flag, name)| {
            rem &= !(*flag as u64);
            name.to_string()
        })
        .collect::<Vec<_>>();

    if rem != 0 {
        names.push(format!("{rem:#x}"));
    }
    match names.is_empty() {
        true => none.to_string(),
        false => names.join("|"),
    }
}

fn decode(data: &[u8]) -> Result<AnalysisRecord> {
    let raw = parse_raw::<MmapEvent>(data)?;

    Ok(AnalysisRecord::new("memory mapping requested")
        .timestamp(raw.timestamp)
        .pid(raw.pid)
        .with("tid", raw.tid)
        .with("addr", format!("{:#x}", raw.addr))
        .with("len", raw.len)
        .with("prot", flags_to_string(raw.prot, PROT_FLAGS, "PROT_NONE"))
        .with("flags", flags_to_string(raw.flags, MAP_FLAGS, "0"))
        .with("anonymous", raw.anonymous != 0))
}

pub(crate) fn module(enhancers: Arc<Enhancers>) -> PerfResolveModule {
    let monitor = Monitor::new("mmap", MMAP_PROBE)
        .add_event(Event::kprobe("vm_mmap_pgoff", "trace_vm_mmap_pgoff"));

    let mut module = PerfResolveModule::new(monitor, enhancers);
    module.register_table("mmap_events", true, Some(Box::new(decode)));
    module.set_tag("mmap_events", "vm");
    module
}
