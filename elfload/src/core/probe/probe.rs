use std::fmt;

use anyhow::Result;

use super::kernel::{KprobeAction, KretprobeAction};
use crate::core::bpf::{ProbeUnit, ProgramHandle};

/// Probe classes supported by this program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeClass {
    Kprobe,
    Kretprobe,
}

impl fmt::Display for ProbeClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProbeClass::Kprobe => write!(f, "kprobe"),
            ProbeClass::Kretprobe => write!(f, "kretprobe"),
        }
    }
}

/// Loads and attaches a probe program. Implemented once per probe class.
pub(crate) trait Action: Send + Sync {
    /// Load the program `fn_name` from the compiled unit.
    fn load(&self, unit: &mut dyn ProbeUnit, fn_name: &str) -> Result<ProgramHandle>;
    /// Attach a loaded program to the kernel `symbol`.
    fn attach(&self, unit: &mut dyn ProbeUnit, prog: &ProgramHandle, symbol: &str) -> Result<()>;
}

/// A kernel attach point: a probe class, the kernel symbol to attach to and
/// the probe program to run there. Events are owned by their monitor and are
/// identified by their position in it; two events with the same fields are
/// still two events.
pub(crate) struct Event {
    pub(crate) class: ProbeClass,
    /// Kernel symbol the probe attaches to.
    pub(crate) name: String,
    /// Probe program function in the compiled unit.
    pub(crate) fn_name: String,
    action: Box<dyn Action>,
}

impl Event {
    pub(crate) fn new(class: ProbeClass, name: &str, fn_name: &str, action: Box<dyn Action>) -> Self {
        Self {
            class,
            name: name.to_string(),
            fn_name: fn_name.to_string(),
            action,
        }
    }

    /// Create a new kprobe event.
    pub(crate) fn kprobe(symbol: &str, fn_name: &str) -> Self {
        Self::new(ProbeClass::Kprobe, symbol, fn_name, Box::new(KprobeAction))
    }

    /// Create a new kretprobe event.
    pub(crate) fn kretprobe(symbol: &str, fn_name: &str) -> Self {
        Self::new(ProbeClass::Kretprobe, symbol, fn_name, Box::new(KretprobeAction))
    }

    /// Load the event program and attach it to its kernel symbol.
    pub(crate) fn load_and_attach(&self, unit: &mut dyn ProbeUnit) -> Result<ProgramHandle> {
        let prog = self.action.load(unit, &self.fn_name)?;
        self.action.attach(unit, &prog, &self.name)?;
        Ok(prog)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} ({})", self.class, self.name, self.fn_name)
    }
}
