use std::{fmt, os::fd::RawFd};

use anyhow::Result;
use crossbeam_channel::Sender;

/// Handle on a probe program loaded in the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgramHandle {
    /// Name of the program function in the compiled unit.
    pub(crate) name: String,
    /// File descriptor of the loaded program.
    pub(crate) fd: RawFd,
}

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (fd {})", self.name, self.fd)
    }
}

/// Compiles probe sources into probe units.
pub(crate) trait KernelBackend: Send + Sync {
    /// Compile the probe `source` of monitor `name`, using the extra compiler
    /// flags `cflags`, and load the resulting object.
    fn compile(&self, name: &str, source: &str, cflags: &[String]) -> Result<Box<dyn ProbeUnit>>;
}

/// A compiled probe object. Dropping it detaches and unloads everything it
/// holds.
pub(crate) trait ProbeUnit: Send {
    /// Retrieve a program by its function name.
    fn load_program(&mut self, fn_name: &str) -> Result<ProgramHandle>;
    /// Attach a loaded program to a kernel symbol, on entry or on return.
    fn attach_kprobe(&mut self, prog: &ProgramHandle, symbol: &str, retprobe: bool)
        -> Result<()>;
    /// Bind a poller to an output table of the unit. Raw payloads retrieved
    /// by the poller are sent to `tx`.
    fn open_poller(&mut self, table: &str, tx: Sender<Vec<u8>>) -> Result<Box<dyn TablePoller>>;
}

/// Retrieves raw payloads from a kernel output table.
pub(crate) trait TablePoller: Send {
    /// Start retrieving payloads, in the background.
    fn start(&mut self) -> Result<()>;
    /// Stop retrieving payloads. Once stopped, the delivery channel is closed.
    fn stop(&mut self);
}
