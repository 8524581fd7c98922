use std::{
    env,
    io::{stderr, IsTerminal, Write},
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use log::{Level, LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

/// Logger backing the log:: macros. Messages always go to stderr: records can
/// be printed on stdout and piped to other tools.
pub(crate) struct Logger {
    max_level: LevelFilter,
    sink: Mutex<LogSink>,
}

struct LogSink {
    stream: BufferedStandardStream,
    colors: bool,
}

impl LogSink {
    fn color(level: Level) -> Color {
        match level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Blue,
            Level::Debug => Color::Cyan,
            Level::Trace => Color::White,
        }
    }

    fn write_time(&mut self) -> Result<()> {
        OffsetDateTime::now_utc().format_into(
            &mut self.stream,
            format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
        )?;
        Ok(())
    }

    fn write_level(&mut self, level: Level) -> Result<()> {
        if self.colors {
            self.stream
                .set_color(ColorSpec::new().set_fg(Some(Self::color(level))))?;
        }
        write!(self.stream, "{level:5} ")?;
        if self.colors {
            self.stream.reset()?;
        }
        Ok(())
    }
}

impl Logger {
    pub(crate) fn init(max_level: LevelFilter) -> Result<Arc<Self>> {
        let logger = Arc::new(Logger {
            max_level,
            sink: Mutex::new(LogSink {
                stream: BufferedStandardStream::stderr(ColorChoice::Auto),
                colors: Self::use_colors(),
            }),
        });

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(Arc::clone(&logger)))?;

        Ok(logger)
    }

    /// Convert a command line log level into a LevelFilter.
    pub(crate) fn parse_level(level: &str) -> Result<LevelFilter> {
        LevelFilter::from_str(level).map_err(|_| anyhow!("Invalid log level '{level}'"))
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        let verbose = self.max_level >= LevelFilter::Debug;
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow!("Logger lock is poisoned"))?;

        if verbose {
            sink.write_time()?;
        }
        // Levels are only shown for problems, unless running verbose.
        if verbose || record.level() <= Level::Warn {
            sink.write_level(record.level())?;
        }
        // Tracing the resolve loops is easier knowing where messages come from.
        if self.max_level == LevelFilter::Trace {
            write!(sink.stream, "[{}] ", record.target())?;
        }

        writeln!(sink.stream, "{}", record.args())?;
        sink.stream.flush()?;
        Ok(())
    }

    fn use_colors() -> bool {
        stderr().is_terminal() && matches!(env::var("TERM"), Ok(term) if term != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Nowhere to report a logging failure.
            let _ = self.try_log(record);
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.stream.flush();
        }
    }
}
