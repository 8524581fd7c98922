use std::io::Write;

use anyhow::Result;

use crate::events::*;

/// Select the format to follow when printing records with `PrintRecord`.
pub(crate) enum PrintRecordFormat {
    /// Text(format): display the records in a text representation following
    /// the rules defined in `format` (see `DisplayFormat`).
    Text(DisplayFormat),
    /// Json: display the record as JSON, one per line.
    Json,
}

/// Handles records individually and write them to a `Write`.
pub(crate) struct PrintRecord {
    writer: Box<dyn Write + Send>,
    format: PrintRecordFormat,
}

impl PrintRecord {
    pub(crate) fn new(writer: Box<dyn Write + Send>, format: PrintRecordFormat) -> Self {
        Self { writer, format }
    }

    /// Process records one by one (format & print).
    pub(crate) fn process_one(&mut self, r: &AnalysisRecord) -> Result<()> {
        match &self.format {
            PrintRecordFormat::Text(format) => {
                let record = format!("{}", r.display(format));
                if !record.is_empty() {
                    self.writer.write_all(record.as_bytes())?;
                    self.writer
                        .write_all(if format.multiline { b"\n\n" } else { b"\n" })?;
                }
            }
            PrintRecordFormat::Json => {
                let mut record = serde_json::to_vec(&r.to_json()?)?;
                record.push(b'\n');
                self.writer.write_all(&record)?;
            }
        }

        Ok(())
    }

    /// Flush underlying writers.
    pub(crate) fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}
