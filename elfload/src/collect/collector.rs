use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::{
    core::{
        bpf::{KernelBackend, ProbeUnit},
        error::MonitorError,
        resolve::PerfResolveModule,
    },
    events::AnalysisRecord,
    helpers::signals::Running,
    launch::{LaunchConfig, ProcessExit, TracedProcess},
    module::exec::elf::inspect_binary,
    process::display::PrintRecord,
};

/// Options of a collection run.
#[derive(Debug, Default, Clone)]
pub(crate) struct CollectOptions {
    pub(crate) launch: LaunchConfig,
    /// Extra compiler flags, added to every monitor.
    pub(crate) cflags: Vec<String>,
    /// Stop the collection after this delay.
    pub(crate) timeout: Option<Duration>,
    /// Keep collecting for this long once the traced process exited.
    pub(crate) linger: Duration,
}

/// Drives a collection run: starts the traced process frozen, attaches the
/// monitors to it, waits for all of them to be ready, resumes the process and
/// forwards the records to the printers until termination.
pub(crate) struct Collectors {
    modules: Vec<PerfResolveModule>,
    backend: Box<dyn KernelBackend>,
    run: Running,
}

/// A monitor attached to the traced process, waiting to be resolved.
struct Attached {
    module: PerfResolveModule,
    unit: Box<dyn ProbeUnit>,
}

impl Collectors {
    pub(crate) fn new(modules: Vec<PerfResolveModule>, backend: Box<dyn KernelBackend>) -> Self {
        Self {
            modules,
            backend,
            run: Running::new(),
        }
    }

    /// Termination handle of the run.
    pub(crate) fn running(&self) -> Running {
        self.run.clone()
    }

    /// Run the whole collection, returning how the traced process ended.
    pub(crate) fn process(
        self,
        options: &CollectOptions,
        printers: Vec<PrintRecord>,
    ) -> Result<ProcessExit> {
        let (out_tx, out_rx) = unbounded();

        let output = {
            let run = self.run.clone();
            thread::spawn(move || forward_records(out_rx, printers, run))
        };

        // The ELF pre-analysis does not need any probe, report it first.
        match inspect_binary(&options.launch.exec) {
            Ok(record) => {
                let _ = out_tx.send(record);
            }
            Err(e) => warn!("Could not inspect {}: {e}", options.launch.exec.display()),
        }

        let result = self.trace(options, out_tx);

        if output.join().is_err() {
            bail!("Output thread panicked");
        }
        result
    }

    fn trace(self, options: &CollectOptions, out: Sender<AnalysisRecord>) -> Result<ProcessExit> {
        let Collectors {
            modules,
            backend,
            run,
        } = self;

        let child = TracedProcess::spawn_stopped(&options.launch)?;
        info!(
            "Started {} (pid {}), attaching monitors",
            options.launch.exec.display(),
            child.pid()
        );

        let attached = match attach(modules, backend.as_ref(), child.pid(), &options.cflags) {
            Ok(attached) => attached,
            Err(e) => {
                if let Err(kill_err) = child.kill().and_then(|_| child.wait()) {
                    warn!("Could not terminate the traced process: {kill_err}");
                }
                return Err(e);
            }
        };

        let (ready_tx, ready_rx) = bounded(0);
        let mut expected = 0;
        let mut resolvers = Vec::new();
        for Attached { mut module, unit } in attached {
            module.register_stop_handler(Box::new(|module: &PerfResolveModule| {
                debug!("Monitor {} cancelled", module.monitor().name());
            }));
            if module.has_tables() {
                expected += 1;
            }

            let name = module.monitor().name().to_string();
            let cancel = run.cancel_channel()?;
            let (out, ready) = (out.clone(), ready_tx.clone());
            resolvers.push((
                name,
                thread::spawn(move || module.resolve(unit, out, ready, cancel)),
            ));
        }
        drop(ready_tx);
        drop(out);

        // The traced process only runs once every monitor is polling.
        let mut readied = 0;
        while readied < expected && ready_rx.recv().is_ok() {
            readied += 1;
        }

        let mut resumed = Ok(());
        if readied == expected && run.running() {
            debug!("All monitors are ready, resuming the traced process");
            resumed = child.resume();
            if let Err(e) = &resumed {
                error!("Could not resume the traced process: {e}");
                run.terminate();
            }
        } else {
            warn!("Only {readied}/{expected} monitors are ready, not resuming the traced process");
            run.terminate();
        }

        // Set once the traced process is reaped, after which its pid can be
        // reused and must not be signaled anymore.
        let reaped = Arc::new(Mutex::new(false));
        let reaper = {
            let (run, reaped) = (run.clone(), Arc::clone(&reaped));
            let linger = options.linger;
            let cancel = run.cancel_channel()?;
            thread::spawn(move || -> Result<ProcessExit> {
                child.wait_exit()?;
                let exit = {
                    let mut reaped = reaped
                        .lock()
                        .map_err(|_| anyhow!("Reaper lock is poisoned"))?;
                    let exit = child.wait()?;
                    *reaped = true;
                    exit
                };
                info!("Traced process {exit}");

                if run.running() && !linger.is_zero() {
                    debug!("Lingering for {}s", linger.as_secs());
                    // Cancellation cuts the linger short.
                    let _ = cancel.recv_timeout(linger);
                }
                run.terminate();
                Ok(exit)
            })
        };

        if let Some(timeout) = options.timeout {
            run.terminate_after(timeout);
        }

        for (name, handle) in resolvers {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(e)) => error!("Monitor {name} failed: {e}"),
                Err(_) => error!("Monitor {name} panicked"),
            }
        }

        // Collection was cancelled while the traced process is still around.
        if !run.running() {
            match reaped.lock() {
                Ok(reaped) if !*reaped => {
                    info!("Terminating the traced process");
                    if let Err(e) = child.kill() {
                        debug!("Could not kill the traced process: {e}");
                    }
                }
                Ok(_) => (),
                Err(_) => error!("Reaper lock is poisoned, not terminating the traced process"),
            }
        }

        let exit = reaper
            .join()
            .map_err(|_| anyhow!("Traced process reaper panicked"))?;
        resumed?;
        exit
    }
}

/// Bind, compile and attach every monitor. Fatal errors are returned,
/// partially attached monitors are left out.
fn attach(
    modules: Vec<PerfResolveModule>,
    backend: &dyn KernelBackend,
    pid: i32,
    cflags: &[String],
) -> Result<Vec<Attached>> {
    let mut attached = Vec::new();

    for mut module in modules {
        let monitor = module.monitor_mut();
        monitor.bind_process(pid);
        monitor.add_cflags(cflags);

        let res = match monitor.compile_and_attach(backend) {
            Ok(res) => res,
            Err(e) => {
                if let Some(err) = e.downcast_ref::<MonitorError>() {
                    if err.is_fatal() {
                        error!("Can't collect without monitor {}", module.monitor().name());
                    }
                }
                return Err(e);
            }
        };
        match res.active {
            true => attached.push(Attached {
                module,
                unit: res.unit,
            }),
            false => warn!(
                "Monitor {} is not fully attached, it won't be used",
                module.monitor().name()
            ),
        }
    }

    Ok(attached)
}

/// Forward records to all the printers, until every producer is done.
fn forward_records(rx: Receiver<AnalysisRecord>, mut printers: Vec<PrintRecord>, run: Running) {
    let mut failed = false;

    for record in rx.iter() {
        if failed {
            continue;
        }
        if let Err(e) = printers.iter_mut().try_for_each(|p| p.process_one(&record)) {
            error!("Could not output records: {e}");
            failed = true;
            run.terminate();
        }
    }

    if let Err(e) = printers.iter_mut().try_for_each(|p| p.flush()) {
        error!("Could not flush records: {e}");
    }
}
