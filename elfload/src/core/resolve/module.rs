use std::{collections::HashMap, sync::Arc, thread};

use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};

use super::{
    wait::{Fired, Slot, WaitSet},
    DecodeFn, Enhancers, TableCtx, TableMode,
};
use crate::{
    core::{
        bpf::{ProbeUnit, TablePoller},
        probe::Monitor,
    },
    events::AnalysisRecord,
};

type StopHandler = Box<dyn Fn(&PerfResolveModule) + Send + Sync>;

/// Composes a monitor with the tables its probes write to, and drives the
/// resolve loop turning the table payloads into records.
pub(crate) struct PerfResolveModule {
    monitor: Monitor,
    enhancers: Arc<Enhancers>,
    /// Table names, in registration order.
    table_ids: Vec<String>,
    tables: HashMap<String, TableCtx>,
    /// Run when the resolve loop is cancelled, before it exits.
    stop_handler: Option<StopHandler>,
}

impl PerfResolveModule {
    pub(crate) fn new(monitor: Monitor, enhancers: Arc<Enhancers>) -> Self {
        Self {
            monitor,
            enhancers,
            table_ids: Vec::new(),
            tables: HashMap::new(),
            stop_handler: None,
        }
    }

    pub(crate) fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub(crate) fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    pub(crate) fn has_tables(&self) -> bool {
        !self.table_ids.is_empty()
    }

    pub(crate) fn table(&self, name: &str) -> Option<&TableCtx> {
        self.tables.get(name.trim())
    }

    /// Register a table of the monitor unit. Blank names and missing decode
    /// handlers are ignored. Continuous tables return a sending side of their
    /// delivery channel, allowing to inject payloads going through the same
    /// decode and enhance path. Registering a table again replaces it.
    pub(crate) fn register_table(
        &mut self,
        name: &str,
        continuous: bool,
        decode: Option<DecodeFn>,
    ) -> Option<Sender<Vec<u8>>> {
        let name = name.trim();
        let decode = match decode {
            Some(decode) if !name.is_empty() => decode,
            _ => {
                debug!("Ignoring table registration for {}", self.monitor.name());
                return None;
            }
        };

        let mode = match continuous {
            true => TableMode::Continuous,
            false => TableMode::OneShot,
        };
        let ctx = TableCtx::new(self.monitor.name(), name, mode, decode);
        let tx = match mode {
            TableMode::Continuous => ctx.sender(),
            TableMode::OneShot => None,
        };

        if self.tables.insert(name.to_string(), ctx).is_none() {
            self.table_ids.push(name.to_string());
        }
        tx
    }

    /// Register a table delivering a single payload.
    pub(crate) fn register_once_table(&mut self, name: &str, decode: Option<DecodeFn>) {
        self.register_table(name, false, decode);
    }

    /// Tag a registered table. Unknown tables are ignored.
    pub(crate) fn set_tag(&mut self, table: &str, tag: &str) {
        if let Some(ctx) = self.tables.get_mut(table.trim()) {
            if ctx.has_tag(tag) {
                debug!("{} is already tagged {tag}", ctx.name);
                return;
            }
            ctx.add_tag(tag);
        }
    }

    pub(crate) fn register_stop_handler(&mut self, handler: StopHandler) {
        self.stop_handler = Some(handler);
    }

    /// Drain all the registered tables until cancellation or until no table is
    /// left. Records are sent to `out`. Once every table poller is started,
    /// readiness is offered once on `ready`.
    pub(crate) fn resolve(
        mut self,
        mut unit: Box<dyn ProbeUnit>,
        out: Sender<AnalysisRecord>,
        ready: Sender<()>,
        cancel: Receiver<()>,
    ) -> Result<()> {
        self.enhancers.log_once();

        if self.table_ids.is_empty() {
            debug!("Monitor {} has no table, nothing to resolve", self.monitor.name());
            return Ok(());
        }

        let mut waitset = WaitSet::new();
        let mut pollers: Vec<(String, Box<dyn TablePoller>)> = Vec::new();
        for (idx, id) in self.table_ids.iter().enumerate() {
            let Some(ctx) = self.tables.get_mut(id) else {
                continue;
            };
            let Some((tx, rx)) = ctx.take_channel() else {
                continue;
            };

            match unit.open_poller(&ctx.table, tx) {
                Ok(poller) => {
                    pollers.push((ctx.name.clone(), poller));
                    waitset.push(Slot::Table { table: idx, rx });
                }
                Err(e) => warn!("Could not poll {}: {e}", ctx.name),
            }
        }

        // A poller failing to start is stopped right away, which closes its
        // table.
        pollers.retain_mut(|(name, poller)| match poller.start() {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not start polling {name}: {e}");
                poller.stop();
                false
            }
        });

        waitset.push(Slot::Ready(ready));
        waitset.push(Slot::Cancel(cancel));

        let this = &self;
        let worker = thread::scope(|s| s.spawn(|| this.multiplex(waitset, &out)).join());

        pollers.iter_mut().for_each(|(_, poller)| poller.stop());
        drop(unit);

        if worker.is_err() {
            bail!("Resolve loop of {} panicked", self.monitor.name());
        }
        debug!("Resolve loop of {} done", self.monitor.name());
        Ok(())
    }

    fn multiplex(&self, mut waitset: WaitSet, out: &Sender<AnalysisRecord>) {
        while waitset.remaining() > 0 {
            let fired = match waitset.wait() {
                Ok(fired) => fired,
                Err(e) => {
                    error!("Resolve loop of {} failed: {e}", self.monitor.name());
                    break;
                }
            };

            match fired {
                Fired::Data { slot, table, data } => {
                    let Some(ctx) = self.table_ids.get(table).and_then(|id| self.tables.get(id))
                    else {
                        waitset.retire(slot);
                        continue;
                    };

                    match self.enhancers.process(ctx, &data) {
                        Ok(record) => {
                            if out.send(record).is_err() {
                                debug!("Record consumer is gone, dropping record from {}", ctx.name);
                            }
                        }
                        Err(e) => warn!("Dropping record from {}: {e}", ctx.name),
                    }

                    if ctx.mode == TableMode::OneShot {
                        waitset.retire(slot);
                    }
                }
                Fired::Closed(slot) | Fired::Readied(slot) | Fired::CancelClosed(slot) => {
                    waitset.retire(slot)
                }
                Fired::Cancelled => {
                    if let Some(handler) = &self.stop_handler {
                        handler(self);
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use crossbeam_channel::{bounded, unbounded};
    use log::Level;

    use super::*;
    use crate::{
        core::{
            bpf::{fake::FakeKernel, KernelBackend},
            resolve::default_enhancers,
        },
        helpers::logger::capture,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn decode() -> Option<DecodeFn> {
        Some(Box::new(|data: &[u8]| match data.first() {
            Some(0xff) | None => bail!("invalid payload"),
            Some(v) => Ok(AnalysisRecord::new("payload").with("value", v)),
        }))
    }

    fn module(name: &str) -> PerfResolveModule {
        PerfResolveModule::new(
            Monitor::new(name, ""),
            Arc::new(default_enhancers().unwrap()),
        )
    }

    struct Run {
        out: Receiver<AnalysisRecord>,
        ready: Receiver<()>,
        cancel: Sender<()>,
        handle: thread::JoinHandle<Result<()>>,
    }

    fn run(module: PerfResolveModule, kernel: &FakeKernel) -> Run {
        let unit = kernel.compile(module.monitor().name(), "", &[]).unwrap();
        let (out_tx, out) = unbounded();
        let (ready_tx, ready) = bounded(0);
        let (cancel, cancel_rx) = bounded(1);

        let handle = thread::spawn(move || module.resolve(unit, out_tx, ready_tx, cancel_rx));
        Run {
            out,
            ready,
            cancel,
            handle,
        }
    }

    #[test]
    fn registration() {
        let mut module = module("mon");

        assert!(module.register_table("  ", true, decode()).is_none());
        assert!(module.register_table("tbl", true, None).is_none());
        assert!(!module.has_tables());

        assert!(module.register_table(" cont ", true, decode()).is_some());
        module.register_once_table("once", decode());
        assert!(module.has_tables());
        assert_eq!(module.table_ids, vec!["cont", "once"]);

        let ctx = module.table("cont").unwrap();
        assert_eq!(ctx.name, "mon@cont");
        assert_eq!(ctx.mode, TableMode::Continuous);
        assert_eq!(module.table("once").unwrap().mode, TableMode::OneShot);

        // Registering again replaces the table, once.
        assert!(module.register_table("once", true, decode()).is_some());
        assert_eq!(module.table_ids, vec!["cont", "once"]);
        assert_eq!(module.table("once").unwrap().mode, TableMode::Continuous);

        module.set_tag("cont", "vm");
        module.set_tag("cont", "vm");
        module.set_tag("unknown", "vm");
        assert!(module.table("cont").unwrap().has_tag("vm"));
        assert_eq!(module.table("cont").unwrap().tags().count(), 1);
        assert!(module.table("unknown").is_none());
    }

    #[test]
    fn no_tables() {
        let kernel = FakeKernel::new();
        let run = run(module("mon"), &kernel);

        assert!(run.handle.join().unwrap().is_ok());
        // Readiness is never offered.
        assert!(run.ready.recv().is_err());
        assert!(kernel.started().is_empty());
    }

    #[test]
    fn end_to_end() {
        let kernel = FakeKernel::new().table("T", vec![vec![1], vec![2], vec![3]], true);
        let mut module = module("M");
        module.register_table("T", true, decode());
        let run = run(module, &kernel);

        assert!(run.ready.recv_timeout(TIMEOUT).is_ok());
        let records = (0..3)
            .map(|_| run.out.recv_timeout(TIMEOUT).unwrap())
            .collect::<Vec<_>>();
        assert!(records.iter().all(|r| r.name == "M@T"));
        // Per table order is preserved.
        assert_eq!(
            records.iter().map(|r| r.get("value").unwrap()).collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );

        run.cancel.send(()).unwrap();
        assert!(run.handle.join().unwrap().is_ok());
        assert!(run.out.try_recv().is_err());
        assert_eq!(kernel.stopped(), vec!["T"]);
    }

    #[test]
    fn one_shot_retirement() {
        let kernel = FakeKernel::new()
            .table("once", vec![vec![1], vec![2]], true)
            .table("cont", vec![vec![3], vec![4]], false);
        let mut module = module("M");
        module.register_once_table("once", decode());
        module.register_table("cont", true, decode());
        let run = run(module, &kernel);

        assert!(run.ready.recv_timeout(TIMEOUT).is_ok());
        // The loop ends by itself: the one-shot table fired, the continuous
        // one got closed and readiness was delivered.
        assert!(run.handle.join().unwrap().is_ok());

        let records = run.out.try_iter().collect::<Vec<_>>();
        assert_eq!(records.iter().filter(|r| r.name == "M@once").count(), 1);
        assert_eq!(records.iter().filter(|r| r.name == "M@cont").count(), 2);

        let mut stopped = kernel.stopped();
        stopped.sort();
        assert_eq!(stopped, vec!["cont", "once"]);
    }

    #[test]
    fn readiness_after_pollers_started() {
        let kernel = FakeKernel::new()
            .table("a", Vec::new(), true)
            .table("b", Vec::new(), true);
        let mut module = module("M");
        module.register_table("a", true, decode());
        module.register_table("b", true, decode());
        let run = run(module, &kernel);

        assert!(run.ready.recv_timeout(TIMEOUT).is_ok());
        assert_eq!(kernel.started(), vec!["a", "b"]);
        // Readiness is only offered once.
        assert!(run.ready.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(kernel.stopped().is_empty());

        run.cancel.send(()).unwrap();
        assert!(run.handle.join().unwrap().is_ok());
        assert_eq!(kernel.stopped().len(), 2);
    }

    #[test]
    fn drop_on_error() {
        capture::install();
        let kernel = FakeKernel::new().table("T", vec![vec![1], vec![0xff], vec![3]], false);
        let mut module = module("dropping");
        module.register_table("T", true, decode());
        module.set_tag("T", "test");
        let run = run(module, &kernel);

        drop(run.ready);
        assert!(run.handle.join().unwrap().is_ok());

        let records = run.out.try_iter().collect::<Vec<_>>();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("value"), Some("1"));
        assert_eq!(records[1].get("value"), Some("3"));
        assert!(records[0].tags.contains("test"));

        // The invalid payload is reported once.
        let warnings = capture::messages(Level::Warn, "Dropping record from dropping@T");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("invalid payload"));
    }

    #[test]
    fn injected_payloads() {
        let kernel = FakeKernel::new().table("T", Vec::new(), true);
        let mut module = module("M");
        let tx = module.register_table("T", true, decode()).unwrap();
        let run = run(module, &kernel);

        assert!(run.ready.recv_timeout(TIMEOUT).is_ok());
        tx.send(vec![9]).unwrap();
        let record = run.out.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(record.name, "M@T");
        assert_eq!(record.get("value"), Some("9"));

        run.cancel.send(()).unwrap();
        assert!(run.handle.join().unwrap().is_ok());
    }

    #[test]
    fn unknown_table_is_skipped() {
        let kernel = FakeKernel::new().table("known", vec![vec![1]], false);
        let mut module = module("M");
        module.register_table("unknown", true, decode());
        module.register_table("known", true, decode());
        let run = run(module, &kernel);

        assert!(run.ready.recv_timeout(TIMEOUT).is_ok());
        assert!(run.handle.join().unwrap().is_ok());
        assert_eq!(run.out.try_iter().count(), 1);
        assert_eq!(kernel.started(), vec!["known"]);
    }

    #[test]
    fn stop_handler() {
        let stopped = Arc::new(AtomicBool::new(false));
        let kernel = FakeKernel::new().table("T", Vec::new(), true);
        let mut module = module("M");
        module.register_table("T", true, decode());
        let flag = stopped.clone();
        module.register_stop_handler(Box::new(move |module: &PerfResolveModule| {
            assert_eq!(module.monitor().name(), "M");
            flag.store(true, Ordering::SeqCst);
        }));
        let run = run(module, &kernel);

        run.cancel.send(()).unwrap();
        assert!(run.handle.join().unwrap().is_ok());
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(kernel.stopped(), vec!["T"]);
    }
}
