//! # Kretprobe
//!
//! Attaches probe programs on kernel function return. Function arguments are
//! not available there, only the return value is.

use anyhow::Result;

use crate::core::{
    bpf::{ProbeUnit, ProgramHandle},
    probe::Action,
};

pub(crate) struct KretprobeAction;

impl Action for KretprobeAction {
    fn load(&self, unit: &mut dyn ProbeUnit, fn_name: &str) -> Result<ProgramHandle> {
        unit.load_program(fn_name)
    }

    fn attach(&self, unit: &mut dyn ProbeUnit, prog: &ProgramHandle, symbol: &str) -> Result<()> {
        unit.attach_kprobe(prog, symbol, true)
    }
}
