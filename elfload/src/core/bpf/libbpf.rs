//! # Libbpf backend
//!
//! Probe sources are compiled with clang into a BPF object, which is then
//! opened and loaded using libbpf. Output tables are perf event arrays.

use std::{
    fs,
    os::fd::{AsFd, AsRawFd},
    path::PathBuf,
    process::Command,
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::Sender;
use libbpf_rs::{MapCore, PerfBuffer, PerfBufferBuilder};
use log::{debug, error, warn};

use super::*;
use crate::helpers::signals::Running;

/// Timeout when polling for new perf buffer payloads.
const PERF_POLL_TIMEOUT_MS: u64 = 200;
/// Default compiler used to build probe objects.
pub(crate) const DEFAULT_CLANG: &str = "clang";

pub(crate) struct LibbpfBackend {
    clang: PathBuf,
    /// Extra include directories, e.g. for the architecture specific headers.
    include_dirs: Vec<PathBuf>,
}

impl LibbpfBackend {
    pub(crate) fn new(clang: Option<PathBuf>) -> Result<Self> {
        let mut include_dirs = Vec::new();

        let multiarch = PathBuf::from(format!("/usr/include/{}-linux-gnu", Self::arch_dir()?));
        if multiarch.exists() {
            include_dirs.push(multiarch);
        }

        Ok(Self {
            clang: clang.unwrap_or_else(|| PathBuf::from(DEFAULT_CLANG)),
            include_dirs,
        })
    }

    /// Value of the __TARGET_ARCH_ definition bpf_tracing.h relies on.
    fn target_arch() -> Result<&'static str> {
        Ok(match std::env::consts::ARCH {
            "x86_64" => "x86",
            "aarch64" => "arm64",
            "powerpc64" => "powerpc",
            "s390x" => "s390",
            arch => bail!("Unsupported architecture {arch}"),
        })
    }

    fn arch_dir() -> Result<&'static str> {
        Ok(match std::env::consts::ARCH {
            "powerpc64" => "powerpc64le",
            "x86_64" | "aarch64" | "s390x" => std::env::consts::ARCH,
            arch => bail!("Unsupported architecture {arch}"),
        })
    }
}

impl KernelBackend for LibbpfBackend {
    fn compile(&self, name: &str, source: &str, cflags: &[String]) -> Result<Box<dyn ProbeUnit>> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join(format!("{name}.bpf.c"));
        let obj = dir.path().join(format!("{name}.bpf.o"));
        fs::write(&src, source)?;

        let mut cmd = Command::new(&self.clang);
        cmd.args(["-O2", "-g", "-target", "bpf"])
            .arg(format!("-D__TARGET_ARCH_{}", Self::target_arch()?));
        self.include_dirs.iter().for_each(|dir| {
            cmd.arg("-I").arg(dir);
        });
        cmd.args(cflags).arg("-c").arg(&src).arg("-o").arg(&obj);

        debug!("Compiling {name}: {cmd:?}");
        let output = cmd
            .output()
            .map_err(|e| anyhow!("Could not run {}: {e}", self.clang.display()))?;
        if !output.status.success() {
            bail!(
                "{} failed ({}): {}",
                self.clang.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let object = libbpf_rs::ObjectBuilder::default()
            .open_file(&obj)?
            .load()?;

        Ok(Box::new(LibbpfUnit {
            object,
            links: Vec::new(),
        }))
    }
}

struct LibbpfUnit {
    object: libbpf_rs::Object,
    links: Vec<libbpf_rs::Link>,
}

impl ProbeUnit for LibbpfUnit {
    fn load_program(&mut self, fn_name: &str) -> Result<ProgramHandle> {
        let prog = self
            .object
            .progs()
            .find(|p| p.name() == fn_name)
            .ok_or_else(|| anyhow!("Couldn't get program {fn_name}"))?;

        Ok(ProgramHandle {
            name: fn_name.to_string(),
            fd: prog.as_fd().as_raw_fd(),
        })
    }

    fn attach_kprobe(
        &mut self,
        prog: &ProgramHandle,
        symbol: &str,
        retprobe: bool,
    ) -> Result<()> {
        let program = self
            .object
            .progs_mut()
            .find(|p| p.name() == prog.name.as_str())
            .ok_or_else(|| anyhow!("Couldn't get program {}", prog.name))?;

        self.links.push(program.attach_kprobe(retprobe, symbol)?);
        Ok(())
    }

    fn open_poller(&mut self, table: &str, tx: Sender<Vec<u8>>) -> Result<Box<dyn TablePoller>> {
        let map = self
            .object
            .maps()
            .find(|m| m.name() == table)
            .ok_or_else(|| anyhow!("Couldn't get table {table}"))?;
        if map.map_type() != libbpf_rs::MapType::PerfEventArray {
            bail!("Table {table} is not a perf event array");
        }

        let lost = table.to_string();
        let buffer = PerfBufferBuilder::new(&map)
            .sample_cb(move |_cpu: i32, data: &[u8]| {
                // The receiving end is gone once the resolve loop is done,
                // payloads arriving after that are of no interest.
                let _ = tx.send(data.to_vec());
            })
            .lost_cb(move |cpu: i32, count: u64| {
                warn!("Lost {count} payloads from {lost} on cpu {cpu}");
            })
            .build()?;

        Ok(Box::new(PerfPoller {
            table: table.to_string(),
            buffer: Some(buffer),
            run_state: Running::new(),
            handle: None,
        }))
    }
}

struct PerfPoller {
    table: String,
    /// The buffer is moved to the polling thread once started.
    buffer: Option<PerfBuffer<'static>>,
    run_state: Running,
    handle: Option<thread::JoinHandle<()>>,
}

impl TablePoller for PerfPoller {
    fn start(&mut self) -> Result<()> {
        let buffer = self
            .buffer
            .take()
            .ok_or_else(|| anyhow!("Poller for {} was already started", self.table))?;
        let rs = self.run_state.clone();
        let table = self.table.clone();

        self.handle = Some(thread::spawn(move || {
            while rs.running() {
                if let Err(e) = buffer.poll(Duration::from_millis(PERF_POLL_TIMEOUT_MS)) {
                    match e.kind() {
                        // Interrupted by a signal, not an issue.
                        libbpf_rs::ErrorKind::Interrupted => (),
                        _ => {
                            error!("Unexpected error while polling {table} ({e})");
                            break;
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.run_state.terminate();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Failed to join the {} polling thread", self.table);
            }
        }
        // Never started, release the buffer (and the delivery channel).
        self.buffer = None;
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn unknown_compiler() {
        let backend = LibbpfBackend::new(Some(PathBuf::from("/does/not/exist/clang"))).unwrap();
        assert!(backend.compile("test", "int x;", &[]).is_err());
    }

    #[test]
    #[serial(libbpf)]
    #[cfg_attr(not(feature = "test_cap_bpf"), ignore)]
    fn compile_and_poll() {
        let source = r#"
#include <linux/bpf.h>
#include <linux/ptrace.h>
#include <bpf/bpf_helpers.h>
#include <bpf/bpf_tracing.h>

struct {
	__uint(type, BPF_MAP_TYPE_PERF_EVENT_ARRAY);
	__uint(key_size, sizeof(int));
	__uint(value_size, sizeof(int));
} test_events SEC(".maps");

SEC("kprobe")
int probe_test(struct pt_regs *ctx)
{
	return 0;
}

char __license[] SEC("license") = "GPL";
"#;
        let backend = LibbpfBackend::new(None).unwrap();
        let mut unit = backend.compile("test", source, &[]).unwrap();

        let prog = unit.load_program("probe_test").unwrap();
        assert!(unit.load_program("probe_unknown").is_err());
        assert!(unit.attach_kprobe(&prog, "vm_mmap_pgoff", false).is_ok());

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut poller = unit.open_poller("test_events", tx).unwrap();
        assert!(poller.start().is_ok());
        poller.stop();
        // Stopping the poller drops the sending side.
        assert!(rx.recv().is_err());
    }
}
