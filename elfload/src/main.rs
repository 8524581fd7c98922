use anyhow::Result;
use clap::Parser;
use log::debug;

mod cli;
mod collect;
mod core;
mod helpers;
mod inspect;
mod launch;
mod module;
mod process;
mod profiles;

use crate::{cli::ElfloadCli, helpers::logger::Logger};

// Re-export events crate. It's not really an import but a re-export so events appear as module
// inside the crate rather than an external crate. However, clippy doesn't like it.
#[allow(clippy::single_component_path_imports)]
use events;

fn main() -> Result<()> {
    let mut cli = ElfloadCli::parse();
    Logger::init(Logger::parse_level(&cli.main_config.log_level)?)?;

    debug!("Running subcommand {}", cli.subcommand.name());
    cli.subcommand.runner().run(&cli.main_config)
}
