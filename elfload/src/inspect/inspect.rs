use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::{
    cli::*,
    core::{inspect::*, resolve::default_enhancers},
    module::get_modules,
};

/// Inspect the current machine.
#[derive(Args, Debug, Default)]
pub(crate) struct Inspect {}

impl SubCommandParserRunner for Inspect {
    fn run(&mut self, main_config: &MainConfig) -> Result<()> {
        let inspector = KernelInspector::from(main_config.kconf.as_ref())?;

        println!("Kernel release: {}", inspector.release());
        for opt in REQUIRED_CONFIG {
            let value = match inspector.get_config_option(opt) {
                Ok(Some(value)) => value,
                Ok(None) => "not set",
                Err(_) => "unknown",
            };
            println!("{opt}: {value}");
        }

        // List the kernel functions the monitors attach to.
        let modules = get_modules(&Arc::new(default_enhancers()?))?.select(None)?;
        for (id, module) in modules.iter() {
            for event in module.monitor().events() {
                let traceable = match inspector.is_traceable(&event.name) {
                    Some(true) => "traceable",
                    Some(false) => "not traceable",
                    None => "unknown",
                };
                println!("{id}: {} {} ({traceable})", event.class, event.name);
            }
        }

        match inspector.check_prerequisites() {
            Ok(()) => println!("Prerequisites: ok"),
            Err(e) => println!("Prerequisites: {e}"),
        }
        Ok(())
    }
}
