//! Fake kernel backend, used to exercise the attachment and resolve logic
//! without having to load anything in the kernel.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    thread,
};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Sender};

use super::*;

/// What happened in the fake kernel, in order.
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    /// (monitor, source) of every compiled unit.
    pub(crate) compiled: Vec<(String, String)>,
    /// Every program retrieved from a unit.
    pub(crate) loaded: Vec<String>,
    /// (program, symbol, retprobe) of every attached probe.
    pub(crate) attached: Vec<(String, String, bool)>,
    /// Tables whose poller was started.
    pub(crate) started: Vec<String>,
    /// Tables whose poller was stopped.
    pub(crate) stopped: Vec<String>,
}

#[derive(Clone, Default)]
struct FakeTable {
    payloads: Vec<Vec<u8>>,
    /// Keep the delivery channel open until the poller is stopped.
    hold_open: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeKernel {
    pub(crate) state: Arc<Mutex<FakeState>>,
    fail_compile: bool,
    fail_load: HashSet<String>,
    fail_attach: HashSet<String>,
    tables: HashMap<String, FakeTable>,
}

impl FakeKernel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_compile(mut self) -> Self {
        self.fail_compile = true;
        self
    }

    pub(crate) fn failing_load(mut self, fn_name: &str) -> Self {
        self.fail_load.insert(fn_name.to_string());
        self
    }

    pub(crate) fn failing_attach(mut self, symbol: &str) -> Self {
        self.fail_attach.insert(symbol.to_string());
        self
    }

    /// Declare a table delivering `payloads` once its poller is started.
    pub(crate) fn table(mut self, name: &str, payloads: Vec<Vec<u8>>, hold_open: bool) -> Self {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                payloads,
                hold_open,
            },
        );
        self
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }
}

impl KernelBackend for FakeKernel {
    fn compile(&self, name: &str, source: &str, _: &[String]) -> Result<Box<dyn ProbeUnit>> {
        if self.fail_compile {
            bail!("fake compilation error");
        }

        self.state
            .lock()
            .unwrap()
            .compiled
            .push((name.to_string(), source.to_string()));
        Ok(Box::new(FakeUnit {
            kernel: self.clone(),
            next_fd: 100,
        }))
    }
}

struct FakeUnit {
    kernel: FakeKernel,
    next_fd: i32,
}

impl ProbeUnit for FakeUnit {
    fn load_program(&mut self, fn_name: &str) -> Result<ProgramHandle> {
        if self.kernel.fail_load.contains(fn_name) {
            bail!("fake load error");
        }

        self.kernel
            .state
            .lock()
            .unwrap()
            .loaded
            .push(fn_name.to_string());
        self.next_fd += 1;
        Ok(ProgramHandle {
            name: fn_name.to_string(),
            fd: self.next_fd,
        })
    }

    fn attach_kprobe(
        &mut self,
        prog: &ProgramHandle,
        symbol: &str,
        retprobe: bool,
    ) -> Result<()> {
        if self.kernel.fail_attach.contains(symbol) {
            bail!("fake attach error");
        }

        self.kernel.state.lock().unwrap().attached.push((
            prog.name.clone(),
            symbol.to_string(),
            retprobe,
        ));
        Ok(())
    }

    fn open_poller(&mut self, table: &str, tx: Sender<Vec<u8>>) -> Result<Box<dyn TablePoller>> {
        let config = self
            .kernel
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow!("Couldn't get table {table}"))?;

        Ok(Box::new(FakePoller {
            table: table.to_string(),
            state: self.kernel.state.clone(),
            config,
            tx: Some(tx),
            stop: None,
            handle: None,
        }))
    }
}

struct FakePoller {
    table: String,
    state: Arc<Mutex<FakeState>>,
    config: FakeTable,
    tx: Option<Sender<Vec<u8>>>,
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TablePoller for FakePoller {
    fn start(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("Poller for {} was already started", self.table))?;
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let config = self.config.clone();

        self.state.lock().unwrap().started.push(self.table.clone());
        self.stop = Some(stop_tx);
        self.handle = Some(thread::spawn(move || {
            for payload in config.payloads {
                if tx.send(payload).is_err() {
                    return;
                }
            }
            if config.hold_open {
                // Returns once the stop side is dropped.
                let _ = stop_rx.recv();
            }
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.stop = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.tx = None;
        self.state.lock().unwrap().stopped.push(self.table.clone());
    }
}
