use std::path::PathBuf;

use anyhow::Result;
use clap::{builder::PossibleValuesParser, Args, Parser, Subcommand, ValueEnum};

use crate::{collect::cli::Collect, inspect::Inspect, process::cli::*};

/// Trait to run a parsed subcommand.
pub(crate) trait SubCommandParserRunner {
    fn run(&mut self, main_config: &MainConfig) -> Result<()>;
}

/// Trace how a binary gets loaded
///
/// elfload runs a binary under kernel probes (kprobes) and reports its ELF
/// loading activity: binary loading, memory mappings and opened files.
#[derive(Parser, Debug)]
#[command(name = "elfload", version, disable_help_subcommand = true, infer_subcommands = true)]
pub(crate) struct ElfloadCli {
    #[command(flatten)]
    pub(crate) main_config: MainConfig,
    #[command(subcommand)]
    pub(crate) subcommand: SubCommands,
}

#[derive(Args, Debug, Default)]
pub(crate) struct MainConfig {
    #[arg(
        long,
        global = true,
        value_parser=PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]),
        default_value = "info",
        help = "Log level",
    )]
    pub(crate) log_level: String,
    #[arg(
        long,
        global = true,
        help = "Path to kernel configuration (e.g. /boot/config-6.3.8-200.fc38.x86_64; default: auto-detect)"
    )]
    pub(crate) kconf: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SubCommands {
    /// Run a binary and collect its ELF loading events.
    Collect(Collect),
    /// Print stored records to stdout.
    Print(Print),
    /// Inspect the current machine.
    Inspect(Inspect),
}

impl SubCommands {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SubCommands::Collect(_) => "collect",
            SubCommands::Print(_) => "print",
            SubCommands::Inspect(_) => "inspect",
        }
    }

    /// Get the runner of the selected subcommand.
    pub(crate) fn runner(&mut self) -> &mut dyn SubCommandParserRunner {
        match self {
            SubCommands::Collect(cmd) => cmd,
            SubCommands::Print(cmd) => cmd,
            SubCommands::Inspect(cmd) => cmd,
        }
    }
}

/// Type of the "format" argument.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliDisplayFormat {
    #[default]
    SingleLine,
    MultiLine,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition() {
        ElfloadCli::command().debug_assert();
    }

    #[test]
    fn main_config() {
        let cli = ElfloadCli::try_parse_from(["elfload", "inspect"]).unwrap();
        assert_eq!(cli.main_config.log_level, "info");
        assert_eq!(cli.subcommand.name(), "inspect");

        // Global options can be given after the subcommand.
        let cli = ElfloadCli::try_parse_from([
            "elfload",
            "--log-level",
            "debug",
            "inspect",
            "--kconf",
            "/tmp/config",
        ])
        .unwrap();
        assert_eq!(cli.main_config.log_level, "debug");
        assert_eq!(cli.main_config.kconf, Some(PathBuf::from("/tmp/config")));

        assert!(ElfloadCli::try_parse_from(["elfload", "--log-level", "verbose", "inspect"]).is_err());
        assert!(ElfloadCli::try_parse_from(["elfload"]).is_err());
    }

    #[test]
    fn print_options() {
        let cli =
            ElfloadCli::try_parse_from(["elfload", "print", "records.json", "--format", "multi-line"])
                .unwrap();
        match cli.subcommand {
            SubCommands::Print(print) => {
                assert_eq!(print.input, PathBuf::from("records.json"));
                assert_eq!(print.format, CliDisplayFormat::MultiLine);
            }
            _ => panic!("unexpected subcommand"),
        }
    }
}
