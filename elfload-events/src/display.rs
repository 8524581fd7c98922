use std::fmt;

pub use fmt::Formatter;

/// Controls how the time should be displayed in the records.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum TimeFormat {
    /// Seconds and nanoseconds since boot, e.g. "81.237462211".
    #[default]
    Monotonic,
    /// Raw nanoseconds since boot.
    Nanoseconds,
}

/// Controls how a record is formatted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayFormat {
    /// Can the formatting logic use more than a single line?
    pub multiline: bool,
    /// How the time is formatted.
    pub time_format: TimeFormat,
}

impl DisplayFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure multi-line output.
    pub fn multiline(mut self, enabled: bool) -> Self {
        self.multiline = enabled;
        self
    }

    /// Configure how the time will be formatted.
    pub fn time_format(mut self, format: TimeFormat) -> Self {
        self.time_format = format;
        self
    }
}

/// Trait controlling how a record (or any custom type inside it) is
/// displayed. It works by providing an helper returning an implementation of
/// the std::fmt::Display trait, which can be used later to provide different
/// formats. Unlike a plain std::fmt::Display implementation, the helper can
/// take arguments.
pub trait EventDisplay<'a>: EventFmt {
    /// Display the record using the given format.
    fn display(&'a self, format: &'a DisplayFormat) -> Box<dyn fmt::Display + 'a>;
}

/// Trait controlling how a record (or any custom type inside it) is
/// formatted. Implementing it gives EventDisplay for free.
pub trait EventFmt {
    /// Default formatting of a record.
    fn event_fmt(&self, f: &mut fmt::Formatter, format: &DisplayFormat) -> fmt::Result;
}

impl<'a, T> EventDisplay<'a> for T
where
    T: EventFmt,
{
    fn display(&'a self, format: &'a DisplayFormat) -> Box<dyn fmt::Display + 'a> {
        struct DefaultDisplay<'a, U> {
            myself: &'a U,
            format: &'a DisplayFormat,
        }
        impl<U: EventFmt> fmt::Display for DefaultDisplay<'_, U> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.myself.event_fmt(f, self.format)
            }
        }
        Box::new(DefaultDisplay {
            myself: self,
            format,
        })
    }
}

/// Formats a nanosecond timestamp following a TimeFormat.
pub struct TimestampDisplay(pub u64, pub TimeFormat);

impl fmt::Display for TimestampDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            TimeFormat::Monotonic => write!(
                f,
                "{}.{:09}",
                self.0 / 1_000_000_000,
                self.0 % 1_000_000_000
            ),
            TimeFormat::Nanoseconds => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formats() {
        assert_eq!(
            format!("{}", TimestampDisplay(81_237_462_211, TimeFormat::Monotonic)),
            "81.237462211"
        );
        assert_eq!(
            format!("{}", TimestampDisplay(42, TimeFormat::Monotonic)),
            "0.000000042"
        );
        assert_eq!(
            format!("{}", TimestampDisplay(42, TimeFormat::Nanoseconds)),
            "42"
        );
    }
}
