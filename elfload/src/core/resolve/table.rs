use std::collections::HashSet;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::events::AnalysisRecord;

/// Decodes a raw table payload into a record.
pub(crate) type DecodeFn = Box<dyn Fn(&[u8]) -> Result<AnalysisRecord> + Send + Sync>;

/// How many payloads a table delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableMode {
    /// A single payload is of interest, the table is retired afterwards.
    OneShot,
    /// Payloads are processed until the table is closed or the resolve loop
    /// is cancelled.
    Continuous,
}

/// Per table context, created at registration time and used by the resolve
/// loop for every payload coming from the table.
pub(crate) struct TableCtx {
    /// Qualified name, "<monitor>@<table>".
    pub(crate) name: String,
    /// Name of the table in the compiled unit.
    pub(crate) table: String,
    pub(crate) mode: TableMode,
    decode: DecodeFn,
    tags: HashSet<String>,
    /// Delivery channel, handed over to the resolve loop once started.
    channel: Option<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>,
}

impl TableCtx {
    pub(crate) fn new(monitor: &str, table: &str, mode: TableMode, decode: DecodeFn) -> Self {
        Self {
            name: format!("{monitor}@{table}"),
            table: table.to_string(),
            mode,
            decode,
            tags: HashSet::new(),
            channel: Some(unbounded()),
        }
    }

    /// Get a new sending side of the delivery channel, if still owned.
    pub(crate) fn sender(&self) -> Option<Sender<Vec<u8>>> {
        self.channel.as_ref().map(|(tx, _)| tx.clone())
    }

    /// Take the delivery channel out of the context.
    pub(crate) fn take_channel(&mut self) -> Option<(Sender<Vec<u8>>, Receiver<Vec<u8>>)> {
        self.channel.take()
    }

    pub(crate) fn decode(&self, data: &[u8]) -> Result<AnalysisRecord> {
        (self.decode)(data)
    }

    pub(crate) fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub(crate) fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub(crate) fn tags(&self) -> impl Iterator<Item = &String> {
        self.tags.iter()
    }
}
