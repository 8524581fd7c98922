//! # Enhancers
//!
//! Enhancers are hooks run around the decoding of every payload, in all the
//! resolve loops. They are registered by name in a registry built once at
//! startup, which is then shared read-only by all the monitor modules.

use std::{collections::HashMap, sync::Once};

use anyhow::{bail, Result};
use log::debug;

use super::TableCtx;
use crate::{core::error::MonitorError, events::AnalysisRecord};

/// Hooks run around the decoding of a payload.
pub(crate) trait Enhancer: Send + Sync {
    /// Called before a payload is decoded.
    fn pre_handle(&self, _ctx: &TableCtx) {}
    /// Called after a payload was decoded, with the decoding result or the
    /// output of the previous enhancer. Enhancers can alter the record, turn
    /// it into an error or recover from one.
    fn after_handle(
        &self,
        _ctx: &TableCtx,
        record: Result<AnalysisRecord>,
    ) -> Result<AnalysisRecord> {
        record
    }
}

/// Guards the one time logging of the registered enhancers.
static ENHANCERS_LOGGED: Once = Once::new();

/// Enhancers registry.
#[derive(Default)]
pub(crate) struct Enhancers {
    enhancers: HashMap<String, Box<dyn Enhancer>>,
}

impl Enhancers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an enhancer. Names must be unique.
    pub(crate) fn register(&mut self, name: &str, enhancer: Box<dyn Enhancer>) -> Result<()> {
        if self.enhancers.contains_key(name) {
            bail!("Enhancer {name} is already registered");
        }
        self.enhancers.insert(name.to_string(), enhancer);
        Ok(())
    }

    /// Names of the registered enhancers, sorted.
    pub(crate) fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.enhancers.keys().map(|n| n.as_str()).collect();
        names.sort();
        names
    }

    /// Log the registered enhancers, only the first time it is called in the
    /// process.
    pub(crate) fn log_once(&self) {
        ENHANCERS_LOGGED.call_once(|| {
            if let Some(summary) = self.summary() {
                debug!("{summary}");
            }
        });
    }

    /// Summary of the registered enhancers, if any.
    fn summary(&self) -> Option<String> {
        match self.enhancers.is_empty() {
            true => None,
            false => Some(format!("Registered enhancers: {}", self.names().join(", "))),
        }
    }

    /// Decode a payload coming from the table `ctx` and run it through all
    /// the enhancers. Returns the final record, named after the table if the
    /// decoding left the name empty, or the error which should lead to the
    /// record being dropped.
    pub(crate) fn process(&self, ctx: &TableCtx, data: &[u8]) -> Result<AnalysisRecord> {
        self.enhancers.values().for_each(|e| e.pre_handle(ctx));

        let mut result: Result<AnalysisRecord> = ctx.decode(data).map_err(|e| {
            MonitorError::Decode {
                table: ctx.name.clone(),
                reason: e.to_string(),
            }
            .into()
        });
        for (name, enhancer) in self.enhancers.iter() {
            let failed = result.is_err();
            result = match enhancer.after_handle(ctx, result) {
                Err(e) if !failed => Err(MonitorError::Enhancer {
                    enhancer: name.clone(),
                    table: ctx.name.clone(),
                    reason: e.to_string(),
                }
                .into()),
                result => result,
            };
        }

        let mut record = result?;
        if record.name.is_empty() {
            record.name = ctx.name.clone();
        }
        Ok(record)
    }
}

/// Copies the tags of the originating table into the record.
pub(crate) struct TagsEnhancer;

impl Enhancer for TagsEnhancer {
    fn after_handle(
        &self,
        ctx: &TableCtx,
        record: Result<AnalysisRecord>,
    ) -> Result<AnalysisRecord> {
        let mut record = record?;
        record.tags.extend(ctx.tags().cloned());
        Ok(record)
    }
}

/// Build the registry of the built-in enhancers.
pub(crate) fn default_enhancers() -> Result<Enhancers> {
    let mut enhancers = Enhancers::new();
    enhancers.register("tags", Box::new(TagsEnhancer))?;
    Ok(enhancers)
}
