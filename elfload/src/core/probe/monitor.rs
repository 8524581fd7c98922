use anyhow::Result;
use log::{debug, warn};

use super::Event;
use crate::core::{
    bpf::{KernelBackend, ProbeUnit},
    error::MonitorError,
};

/// Placeholder in probe sources, substituted with the traced pid.
pub(crate) const PID_PLACEHOLDER: &str = "_PID_";

/// A named bundle of probe source, compiler flags and events. Monitors are
/// built at startup, bound to the traced process once its pid is known, then
/// compiled and attached.
pub(crate) struct Monitor {
    name: String,
    source: String,
    cflags: Vec<String>,
    events: Vec<Event>,
    /// Failing to attach an essential monitor aborts the whole run.
    essential: bool,
}

/// Result of a monitor compilation and attachment.
pub(crate) struct AttachedMonitor {
    /// Compiled unit. Dropping it detaches the monitor.
    pub(crate) unit: Box<dyn ProbeUnit>,
    /// Were all the monitor events attached? Inactive monitors must not be
    /// resolved.
    pub(crate) active: bool,
}

impl Monitor {
    pub(crate) fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            cflags: Vec::new(),
            events: Vec::new(),
            essential: false,
        }
    }

    /// Mark the monitor as essential.
    pub(crate) fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    /// Add an event to the monitor. Events are attached in insertion order.
    pub(crate) fn add_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Add compiler flags used when building the monitor source.
    pub(crate) fn add_cflags(&mut self, cflags: &[String]) {
        self.cflags.extend_from_slice(cflags);
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_essential(&self) -> bool {
        self.essential
    }

    pub(crate) fn events(&self) -> &[Event] {
        &self.events
    }

    /// Bind the monitor to the traced process, by substituting the pid
    /// placeholder in its source. Binding an already bound monitor does
    /// nothing.
    pub(crate) fn bind_process(&mut self, pid: i32) {
        if !self.source.contains(PID_PLACEHOLDER) {
            debug!("Monitor {} has no pid placeholder, not binding it", self.name);
            return;
        }
        self.source = self.source.replace(PID_PLACEHOLDER, &pid.to_string());
    }

    /// Compile the monitor source and attach its events, in order. The first
    /// failure stops the attachment: an essential monitor then returns a
    /// fatal error, others are returned inactive.
    pub(crate) fn compile_and_attach(&self, backend: &dyn KernelBackend) -> Result<AttachedMonitor> {
        let mut unit = backend
            .compile(&self.name, &self.source, &self.cflags)
            .map_err(|e| MonitorError::Compile {
                monitor: self.name.clone(),
                reason: e.to_string(),
            })?;

        let mut failure = None;
        for event in self.events.iter() {
            if let Err(e) = event.load_and_attach(unit.as_mut()) {
                let err = MonitorError::Attach {
                    monitor: self.name.clone(),
                    event: event.to_string(),
                    reason: e.to_string(),
                };
                warn!("{err}");
                failure = Some(err);
                break;
            }
            debug!("Attached {event} for monitor {}", self.name);
        }

        match failure {
            Some(err) if self.essential => Err(MonitorError::Essential {
                monitor: self.name.clone(),
                reason: err.to_string(),
            }
            .into()),
            Some(_) => Ok(AttachedMonitor {
                unit,
                active: false,
            }),
            None => Ok(AttachedMonitor { unit, active: true }),
        }
    }
}
