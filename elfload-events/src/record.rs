//! Internal representation of analysis records. Records are produced by the
//! collection pipeline, one per decoded kernel event, and can be marshaled to
//! JSON to be stored or displayed.
//!
//! As an example, a single JSON record looks like:
//!
//! {
//!     "name": "mmap@mmap_events",
//!     "timestamp": 81237519230,
//!     "pid": 4242,
//!     "desc": "memory mapping requested",
//!     "data": {
//!         "addr": "0x0",
//!         "len": "8192",
//!         "prot": "PROT_READ|PROT_WRITE"
//!     },
//!     "tags": ["vm"]
//! }

#![allow(clippy::wrong_self_convention)]

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::display::*;

/// Analysis record. The only field the pipeline relies upon is `name`, which
/// is always set once a record is forwarded to consumers.
#[serde_with::skip_serializing_none]
#[derive(Default, Debug, Clone, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AnalysisRecord {
    /// Record name, by default "<monitor>@<table>".
    #[serde(default)]
    pub name: String,
    /// Kernel monotonic timestamp (ns) of the originating event, if any.
    pub timestamp: Option<u64>,
    /// Pid of the task which triggered the event, if any.
    pub pid: Option<u32>,
    /// Human readable description.
    #[serde(default)]
    pub desc: String,
    /// Decoded key/value data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Tags attached while the record went through the pipeline.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl AnalysisRecord {
    pub fn new(desc: &str) -> AnalysisRecord {
        AnalysisRecord {
            desc: desc.to_string(),
            ..Default::default()
        }
    }

    /// Set the record name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the record timestamp.
    pub fn timestamp(mut self, ts: u64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Set the record pid.
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Add a key/value pair to the record data. An existing key is
    /// overwritten.
    pub fn with<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    /// Retrieve a data value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| v.as_str())
    }

    /// Create a record from a json string.
    pub fn from_json(line: &str) -> Result<AnalysisRecord> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl EventFmt for AnalysisRecord {
    fn event_fmt(&self, f: &mut Formatter, format: &DisplayFormat) -> std::fmt::Result {
        if let Some(ts) = self.timestamp {
            write!(f, "{} ", TimestampDisplay(ts, format.time_format))?;
        }
        if let Some(pid) = self.pid {
            write!(f, "[{pid}] ")?;
        }
        write!(f, "{}", self.name)?;
        if !self.desc.is_empty() {
            write!(f, ": {}", self.desc)?;
        }
        if !self.tags.is_empty() {
            write!(
                f,
                " ({})",
                self.tags.iter().cloned().collect::<Vec<_>>().join(",")
            )?;
        }

        for (key, value) in self.data.iter() {
            match format.multiline {
                true => write!(f, "\n    {key} = {value}")?,
                false => write!(f, " {key}={value}")?,
            }
        }

        Ok(())
    }
}
