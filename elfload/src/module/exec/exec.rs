use std::sync::Arc;

use anyhow::Result;
use nix::errno::Errno;
use plain::Plain;

use crate::{
    core::{
        probe::{Event, Monitor},
        resolve::{Enhancers, PerfResolveModule},
    },
    events::AnalysisRecord,
    helpers::raw::{parse_raw, raw_to_string},
};

const EXEC_PROBE: &str = include_str!("bpf/exec.bpf.c");
const TASK_COMM_LEN: usize = 16;

/// Kernel symbol the monitor probes attach to.
pub(crate) const ELF_LOADER: &str = "load_elf_binary";

/// Please keep in sync with its BPF counterpart.
#[derive(Default)]
#[repr(C)]
struct ExecStartEvent {
    timestamp: u64,
    pid: u32,
    tid: u32,
    comm: [u8; TASK_COMM_LEN],
}

unsafe impl Plain for ExecStartEvent {}

/// Please keep in sync with its BPF counterpart.
#[derive(Default)]
#[repr(C)]
struct ExecRetEvent {
    timestamp: u64,
    pid: u32,
    tid: u32,
    ret: i64,
    comm: [u8; TASK_COMM_LEN],
}

unsafe impl Plain for ExecRetEvent {}

fn decode_start(data: &[u8]) -> Result<AnalysisRecord> {
    let raw = parse_raw::<ExecStartEvent>(data)?;

    Ok(AnalysisRecord::new("ELF loading started")
        .timestamp(raw.timestamp)
        .pid(raw.pid)
        .with("tid", raw.tid)
        .with("comm", raw_to_string(&raw.comm)?))
}

fn decode_ret(data: &[u8]) -> Result<AnalysisRecord> {
    let raw = parse_raw::<ExecRetEvent>(data)?;

    let record = match raw.ret {
        0 => AnalysisRecord::new("ELF loading succeeded"),
        _ => AnalysisRecord::new("ELF loading failed"),
    };
    let record = record
        .timestamp(raw.timestamp)
        .pid(raw.pid)
        .with("tid", raw.tid)
        .with("ret", raw.ret)
        .with("comm", raw_to_string(&raw.comm)?);

    Ok(match raw.ret {
        0 => record,
        ret => record.with("error", errno_name(ret)),
    })
}

/// Name of the errno a negative return value stands for, or the raw value if
/// it can't be one.
fn errno_name(ret: i64) -> String {
    match ret.checked_neg().and_then(|errno| i32::try_from(errno).ok()) {
        Some(errno) => format!("{:?}", Errno::from_raw(errno)),
        None => ret.to_string(),
    }
}

/// Build the exec module. Without it nothing can be said about the ELF
/// loading, so it is essential.
pub(crate) fn module(enhancers: Arc<Enhancers>) -> PerfResolveModule {
    let monitor = Monitor::new("exec", EXEC_PROBE)
        .essential()
        .add_event(Event::kprobe(ELF_LOADER, "trace_load_elf_binary"))
        .add_event(Event::kretprobe(ELF_LOADER, "trace_load_elf_binary_ret"));

    let mut module = PerfResolveModule::new(monitor, enhancers);
    module.register_once_table("start_events", Some(Box::new(decode_start)));
    module.register_once_table("ret_events", Some(Box::new(decode_ret)));
    module.set_tag("start_events", "exec");
    module.set_tag("ret_events", "exec");
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolve::{default_enhancers, TableMode};

    fn comm(name: &str) -> [u8; TASK_COMM_LEN] {
        let mut comm = [0; TASK_COMM_LEN];
        comm[..name.len()].copy_from_slice(name.as_bytes());
        comm
    }

    fn ret_payload(ret: i64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&42u64.to_ne_bytes());
        data.extend_from_slice(&1000u32.to_ne_bytes());
        data.extend_from_slice(&1001u32.to_ne_bytes());
        data.extend_from_slice(&ret.to_ne_bytes());
        data.extend_from_slice(&comm("true"));
        data
    }

    #[test]
    fn decode_start_event() {
        let mut data = Vec::new();
        data.extend_from_slice(&1_000_000_000u64.to_ne_bytes());
        data.extend_from_slice(&1000u32.to_ne_bytes());
        data.extend_from_slice(&1000u32.to_ne_bytes());
        data.extend_from_slice(&comm("elfload"));

        let record = decode_start(&data).unwrap();
        assert_eq!(record.timestamp, Some(1_000_000_000));
        assert_eq!(record.pid, Some(1000));
        assert_eq!(record.get("comm"), Some("elfload"));
        assert!(record.name.is_empty());

        assert!(decode_start(&data[..16]).is_err());
    }

    #[test]
    fn decode_ret_event() {
        let record = decode_ret(&ret_payload(0)).unwrap();
        assert_eq!(record.desc, "ELF loading succeeded");
        assert_eq!(record.get("comm"), Some("true"));
        assert_eq!(record.get("tid"), Some("1001"));
        assert!(record.get("error").is_none());

        let record = decode_ret(&ret_payload(-8)).unwrap();
        assert_eq!(record.desc, "ELF loading failed");
        assert_eq!(record.get("ret"), Some("-8"));
        assert_eq!(record.get("error"), Some("ENOEXEC"));

        // Out of range return values are kept raw.
        let record = decode_ret(&ret_payload(i64::MIN)).unwrap();
        assert_eq!(record.get("error"), Some(i64::MIN.to_string().as_str()));
        let record = decode_ret(&ret_payload(-(1 << 40))).unwrap();
        assert_eq!(record.get("error"), Some("-1099511627776"));
    }

    #[test]
    fn exec_module() {
        let module = module(Arc::new(default_enhancers().unwrap()));
        let monitor = module.monitor();

        assert!(monitor.is_essential());
        assert_eq!(monitor.events().len(), 2);

        let start = module.table("start_events").unwrap();
        assert_eq!(start.name, "exec@start_events");
        assert_eq!(start.mode, TableMode::OneShot);
        assert!(start.has_tag("exec"));
        assert_eq!(module.table("ret_events").unwrap().mode, TableMode::OneShot);
    }
}
