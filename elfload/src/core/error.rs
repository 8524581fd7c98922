/// Specific errors the attachment and resolve logic can generate. They are
/// carried inside anyhow errors so callers can tell them apart using
/// `downcast_ref`.
#[derive(thiserror::Error, Debug, PartialEq)]
pub(crate) enum MonitorError {
    /// The monitor probe source could not be compiled. Always fatal.
    #[error("Could not compile monitor {monitor}: {reason}")]
    Compile { monitor: String, reason: String },
    /// A probe program could not be loaded or attached. The monitor is
    /// inactive for the rest of the run.
    #[error("Could not attach {event} of monitor {monitor}: {reason}")]
    Attach {
        monitor: String,
        event: String,
        reason: String,
    },
    /// An essential monitor could not be fully attached. Always fatal.
    #[error("Essential monitor {monitor} could not be attached: {reason}")]
    Essential { monitor: String, reason: String },
    /// A raw payload could not be decoded. The record is dropped.
    #[error("Could not decode record from {table}: {reason}")]
    Decode { table: String, reason: String },
    /// An enhancer reported an error. The record is dropped.
    #[error("Enhancer {enhancer} failed on {table}: {reason}")]
    Enhancer {
        enhancer: String,
        table: String,
        reason: String,
    },
}

impl MonitorError {
    /// Is the error fatal for the whole run?
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::Compile { .. } | MonitorError::Essential { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        let compile = MonitorError::Compile {
            monitor: "exec".to_string(),
            reason: "clang exited with 1".to_string(),
        };
        assert!(compile.is_fatal());
        assert_eq!(
            compile.to_string(),
            "Could not compile monitor exec: clang exited with 1"
        );

        let decode = MonitorError::Decode {
            table: "mmap@mmap_events".to_string(),
            reason: "too small".to_string(),
        };
        assert!(!decode.is_fatal());
    }

    #[test]
    fn downcast_from_anyhow() {
        let err: anyhow::Error = MonitorError::Essential {
            monitor: "exec".to_string(),
            reason: "no such symbol".to_string(),
        }
        .into();

        assert!(matches!(
            err.downcast_ref::<MonitorError>(),
            Some(MonitorError::Essential { .. })
        ));
    }
}
