//! # Collect
//!
//! Collect runs a binary with the monitors attached to it and reports what
//! happened while the kernel loaded it.

use std::{
    fs::OpenOptions,
    io::{self, BufWriter},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Result};
use clap::Args;
use log::{info, warn};

use super::{CollectOptions, Collectors};
use crate::{
    cli::*,
    core::{bpf::libbpf::LibbpfBackend, inspect::KernelInspector, resolve::default_enhancers},
    events::DisplayFormat,
    launch::LaunchConfig,
    module::{get_modules, ModuleId},
    process::display::{PrintRecord, PrintRecordFormat},
    profiles::CollectProfile,
};

/// Collect the loading events of a binary.
///
/// The binary is started frozen, monitors are attached to it, and it is only
/// resumed once all of them are live. Records are printed on the console
/// unless an output file is given.
#[derive(Args, Debug, Default)]
pub(crate) struct Collect {
    #[arg(long, help = "Binary to run and trace")]
    pub(super) exec: PathBuf,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Arguments given to the binary, separated by spaces"
    )]
    pub(super) arg: Option<String>,
    #[arg(long, help = "Run the binary as this user")]
    pub(super) user: Option<String>,
    #[arg(id = "in", long = "in", help = "Redirect the binary stdin from this file")]
    pub(super) stdin: Option<PathBuf>,
    #[arg(id = "out", long = "out", help = "Redirect the binary stdout to this file")]
    pub(super) stdout: Option<PathBuf>,
    #[arg(id = "err", long = "err", help = "Redirect the binary stderr to this file")]
    pub(super) stderr: Option<PathBuf>,
    #[arg(
        short,
        long,
        help = "Write the records to a file (JSON lines) rather than to stdout"
    )]
    pub(super) output: Option<PathBuf>,
    #[arg(long, help = "Print the records to stdout even if --output is used")]
    pub(super) print: bool,
    #[arg(long, help = "Stop collecting after this many seconds")]
    pub(super) timeout: Option<u64>,
    #[arg(
        long,
        help = "Keep collecting for this many seconds once the binary exited [default: 0]"
    )]
    pub(super) linger: Option<u64>,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Comma-separated list of monitors to enable (exec, mmap, open).

If this is not set all monitors are enabled. The exec monitor is always enabled."
    )]
    pub(super) monitors: Option<Vec<String>>,
    #[arg(long, help = "Compiler used to build the probes [default: clang]")]
    pub(super) clang: Option<PathBuf>,
    // Use the plural in the struct but singular for the cli parameter as we're
    // dealing with a list here.
    #[arg(
        id = "cflag",
        long = "cflag",
        allow_hyphen_values = true,
        help = "Extra flag used when compiling the probes. Can be used multiple times."
    )]
    pub(super) cflags: Vec<String>,
    #[arg(long, help = "YAML profile providing default values for the above options")]
    pub(super) config: Option<PathBuf>,
}

impl Collect {
    /// Fill the options not given on the command line from a profile.
    pub(super) fn apply_profile(&mut self, profile: CollectProfile) {
        if let Some(about) = &profile.about {
            info!("Using profile: {about}");
        }

        if self.monitors.is_none() {
            self.monitors = profile.monitors;
        }
        if self.clang.is_none() {
            self.clang = profile.clang;
        }
        if self.output.is_none() {
            self.output = profile.output;
        }
        if !self.print {
            self.print = profile.print.unwrap_or(false);
        }
        if self.timeout.is_none() {
            self.timeout = profile.timeout;
        }
        if self.linger.is_none() {
            self.linger = profile.linger;
        }

        // Flags given on the command line come last, so they can override
        // the profile ones.
        let mut cflags = profile.cflags;
        cflags.append(&mut self.cflags);
        self.cflags = cflags;
    }

    /// Parse the monitor selection.
    pub(super) fn selection(&self) -> Result<Option<Vec<ModuleId>>> {
        self.monitors
            .as_ref()
            .map(|monitors| {
                monitors
                    .iter()
                    .map(|m| m.trim().parse())
                    .collect::<Result<Vec<ModuleId>>>()
            })
            .transpose()
    }

    pub(super) fn options(&self) -> CollectOptions {
        CollectOptions {
            launch: LaunchConfig {
                exec: self.exec.clone(),
                args: self
                    .arg
                    .as_deref()
                    .map(|args| args.split_whitespace().map(String::from).collect())
                    .unwrap_or_default(),
                user: self.user.clone(),
                stdin: self.stdin.clone(),
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            },
            cflags: self.cflags.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            linger: Duration::from_secs(self.linger.unwrap_or(0)),
        }
    }

    fn printers(&self) -> Result<Vec<PrintRecord>> {
        let mut printers = Vec::new();

        // Write records to stdout if we don't write to a file (--output) or
        // if explicitly asked to (--print).
        if self.output.is_none() || self.print {
            printers.push(PrintRecord::new(
                Box::new(io::stdout()),
                PrintRecordFormat::Text(DisplayFormat::new()),
            ));
        }

        if let Some(out) = self.output.as_ref() {
            printers.push(PrintRecord::new(
                Box::new(BufWriter::new(
                    OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(true)
                        .open(out)
                        .or_else(|_| bail!("Could not create or open '{}'", out.display()))?,
                )),
                PrintRecordFormat::Json,
            ));
        }

        Ok(printers)
    }
}

impl SubCommandParserRunner for Collect {
    fn run(&mut self, main_config: &MainConfig) -> Result<()> {
        if let Some(config) = &self.config {
            let profile = CollectProfile::load(config)?;
            self.apply_profile(profile);
        }

        let inspector = KernelInspector::from(main_config.kconf.as_ref())?;
        inspector.check_prerequisites()?;

        let selection = self.selection()?;
        let modules = get_modules(&Arc::new(default_enhancers()?))?
            .select(selection.as_deref())?
            .into_iter()
            .map(|(id, module)| {
                for event in module.monitor().events() {
                    if inspector.is_traceable(&event.name) == Some(false) {
                        warn!("{id}: {} does not look traceable", event.name);
                    }
                }
                module
            })
            .collect();

        let backend = LibbpfBackend::new(self.clang.clone())?;
        let collectors = Collectors::new(modules, Box::new(backend));
        collectors.running().register_term_signals()?;

        let exit = collectors.process(&self.options(), self.printers()?)?;
        info!("Collection done, traced process {exit}");
        Ok(())
    }
}
