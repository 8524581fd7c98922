//! Dynamic wait-any over a changing set of channels. Sources are kept in a
//! slot table; retiring a source clears its slot (dropping its channel end)
//! without disturbing the other slots.

use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, Select, Sender};

/// A source the resolve loop waits on.
pub(crate) enum Slot {
    /// Payloads from the table at index `table` in the registration order.
    Table {
        table: usize,
        rx: Receiver<Vec<u8>>,
    },
    /// Readiness rendezvous, offered once.
    Ready(Sender<()>),
    /// Cancellation requests.
    Cancel(Receiver<()>),
}

/// What woke up the wait.
#[derive(Debug, PartialEq)]
pub(crate) enum Fired {
    /// A payload was received from a table.
    Data {
        slot: usize,
        table: usize,
        data: Vec<u8>,
    },
    /// A table channel was closed.
    Closed(usize),
    /// The readiness rendezvous happened, or was refused by its receiver.
    Readied(usize),
    /// Cancellation was requested.
    Cancelled,
    /// The cancellation channel was closed, it can't fire anymore.
    CancelClosed(usize),
}

#[derive(Default)]
pub(crate) struct WaitSet {
    slots: Vec<Option<Slot>>,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a source, returning its slot index.
    pub(crate) fn push(&mut self, slot: Slot) -> usize {
        self.slots.push(Some(slot));
        self.slots.len() - 1
    }

    /// Retire a source. Retiring an empty slot is a no-op.
    pub(crate) fn retire(&mut self, slot: usize) {
        if let Some(slot) = self.slots.get_mut(slot) {
            *slot = None;
        }
    }

    /// Number of sources still armed, not counting cancellation: once only
    /// cancellation is left there is nothing to wait for.
    pub(crate) fn remaining(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Some(Slot::Table { .. }) | Some(Slot::Ready(_))))
            .count()
    }

    /// Block until one of the armed sources fires. Fairness between sources
    /// is the one of crossbeam's Select.
    pub(crate) fn wait(&self) -> Result<Fired> {
        let mut sel = Select::new();
        let mut armed = Vec::new();

        for (i, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else {
                continue;
            };
            match slot {
                Slot::Table { rx, .. } => sel.recv(rx),
                Slot::Ready(tx) => sel.send(tx),
                Slot::Cancel(rx) => sel.recv(rx),
            };
            armed.push((i, slot));
        }

        if armed.is_empty() {
            bail!("No source to wait on");
        }

        // Operations are indexed in the order they were added.
        let oper = sel.select();
        let (i, slot) = armed[oper.index()];
        Ok(match slot {
            Slot::Table { table, rx } => match oper.recv(rx) {
                Ok(data) => Fired::Data {
                    slot: i,
                    table: *table,
                    data,
                },
                Err(_) => Fired::Closed(i),
            },
            Slot::Ready(tx) => {
                // Delivered or refused, readiness is never offered twice.
                let _ = oper.send(tx, ());
                Fired::Readied(i)
            }
            Slot::Cancel(rx) => match oper.recv(rx) {
                Ok(_) => Fired::Cancelled,
                Err(_) => Fired::CancelClosed(i),
            },
        })
    }
}
