//! # Print
//!
//! Print is a simple post-processing command that just parses stored records
//! and prints them back to stdout.

use std::{
    io::{self, stdout, ErrorKind},
    path::PathBuf,
};

use anyhow::Result;
use clap::Args;

use crate::{
    cli::*,
    events::{file::*, *},
    helpers::signals::Running,
    process::display::*,
};

#[derive(Args, Debug, Default)]
pub(crate) struct Print {
    #[arg(help = "File to read records from (JSON lines)")]
    pub(crate) input: PathBuf,
    #[arg(long, help = "Format used when printing a record")]
    #[clap(value_enum, default_value_t=CliDisplayFormat::SingleLine)]
    pub(crate) format: CliDisplayFormat,
    #[arg(long, help = "Print timestamps as raw nanoseconds")]
    pub(crate) raw_time: bool,
}

impl SubCommandParserRunner for Print {
    fn run(&mut self, _: &MainConfig) -> Result<()> {
        // Create running instance that will handle signal termination.
        let run = Running::new();
        run.register_term_signals()?;

        let mut reader = RecordFileReader::new(&self.input)?;

        // Format.
        let format = DisplayFormat::new()
            .multiline(self.format == CliDisplayFormat::MultiLine)
            .time_format(match self.raw_time {
                true => TimeFormat::Nanoseconds,
                false => TimeFormat::Monotonic,
            });
        let mut output = PrintRecord::new(Box::new(stdout()), PrintRecordFormat::Text(format));

        while run.running() {
            match reader.next_record()? {
                Some(record) => {
                    if let Err(e) = output.process_one(&record) {
                        match is_broken_pipe(&e) {
                            true => break,
                            false => return Err(e),
                        }
                    }
                }
                None => break,
            }
        }

        match output.flush() {
            Err(e) if !is_broken_pipe(&e) => Err(e),
            _ => Ok(()),
        }
    }
}

fn is_broken_pipe(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<io::Error>(), Some(e) if e.kind() == ErrorKind::BrokenPipe)
}
