use std::sync::Arc;

use anyhow::{bail, Result};
use plain::Plain;

use crate::{
    core::{
        probe::{Event, Monitor},
        resolve::{Enhancers, PerfResolveModule},
    },
    events::AnalysisRecord,
    helpers::raw::{parse_raw, raw_to_string},
};

const OPEN_PROBE: &str = include_str!("bpf/open.bpf.c");
const PATH_LEN: usize = 256;

/// Please keep in sync with its BPF counterpart.
#[repr(C)]
struct OpenEvent {
    timestamp: u64,
    pid: u32,
    tid: u32,
    dfd: i32,
    /// Result of reading the filename: its length including the trailing
    /// NULL byte, or a negative error.
    len: i32,
    filename: [u8; PATH_LEN],
}

impl Default for OpenEvent {
    fn default() -> Self {
        Self {
            timestamp: 0,
            pid: 0,
            tid: 0,
            dfd: 0,
            len: 0,
            filename: [0; PATH_LEN],
        }
    }
}

unsafe impl Plain for OpenEvent {}

fn decode(data: &[u8]) -> Result<AnalysisRecord> {
    let raw = parse_raw::<OpenEvent>(data)?;
    if raw.len < 0 {
        bail!("Could not read the filename ({})", raw.len);
    }

    let dfd = match raw.dfd {
        libc::AT_FDCWD => "AT_FDCWD".to_string(),
        dfd => dfd.to_string(),
    };

    Ok(AnalysisRecord::new("file opened")
        .timestamp(raw.timestamp)
        .pid(raw.pid)
        .with("tid", raw.tid)
        .with("dfd", dfd)
        .with("path", raw_to_string(&raw.filename)?))
}

pub(crate) fn module(enhancers: Arc<Enhancers>) -> PerfResolveModule {
    let monitor = Monitor::new("open", OPEN_PROBE)
        .add_event(Event::kprobe("do_sys_openat2", "trace_do_sys_openat2"));

    let mut module = PerfResolveModule::new(monitor, enhancers);
    module.register_table("open_events", true, Some(Box::new(decode)));
    module.set_tag("open_events", "fs");
    module
}
