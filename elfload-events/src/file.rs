//! Handles the file (json lines) to Rust record retrieval and the unmarshaling
//! process.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{anyhow, Result};

use super::AnalysisRecord;

/// File records reader, retrieving and unmarshaling records stored one per
/// line.
pub struct RecordFileReader {
    reader: BufReader<File>,
    line: usize,
}

impl RecordFileReader {
    pub fn new<P>(file: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let reader = BufReader::new(
            File::open(&file)
                .map_err(|e| anyhow!("Could not open {}: {e}", file.as_ref().display()))?,
        );

        Ok(RecordFileReader { reader, line: 0 })
    }

    /// Retrieve the next record or None if we've reached the end of the file.
    /// Blank lines are skipped.
    pub fn next_record(&mut self) -> Result<Option<AnalysisRecord>> {
        let mut line = String::new();

        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Err(e) => return Err(e.into()),
                Ok(0) => return Ok(None),
                Ok(_) => self.line += 1,
            }

            if line.trim().is_empty() {
                continue;
            }

            return AnalysisRecord::from_json(&line)
                .map(Some)
                .map_err(|e| anyhow!("Invalid record at line {}: {e}", self.line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_from_file() {
        let mut reader = RecordFileReader::new("test_data/records.json").unwrap();

        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record)
        }
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "exec@start_events");
        assert_eq!(records[1].get("path"), Some("/lib64/ld-linux-x86-64.so.2"));
        assert!(records[2].tags.is_empty());
    }

    #[test]
    fn missing_file() {
        assert!(RecordFileReader::new("test_data/does_not_exist.json").is_err());
    }
}
