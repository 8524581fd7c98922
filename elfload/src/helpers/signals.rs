/// # Signals
///
/// Provides a simple way for both registering signal handlers and notifying
/// terminations to the threads, either by polling a flag or by waiting on a
/// dedicated cancellation channel.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::info;
use signal_hook::iterator::Signals;

#[derive(Clone, Default)]
pub(crate) struct Running {
    condition: Arc<AtomicBool>,
    /// Cancellation channels handed out to the resolve loops. Each one gets a
    /// single message on termination.
    cancels: Arc<Mutex<Vec<Sender<()>>>>,
}

impl Running {
    // Create a new Running instance, not handling termination signals until
    // `register_term_signals()` is called.
    pub(crate) fn new() -> Running {
        Self::default()
    }

    // Stop upon receiving one of the termination signals (e.g. SIGTERM).
    pub(crate) fn register_term_signals(&self) -> Result<()> {
        let mut sigs = Signals::new(signal_hook::consts::TERM_SIGNALS)?;
        let run = self.clone();

        thread::spawn(move || {
            if sigs.wait().next().is_some() {
                info!("Received signal, terminating...");
                run.terminate();
            }
        });

        Ok(())
    }

    // Terminate after the given delay, unless terminated before.
    pub(crate) fn terminate_after(&self, delay: Duration) {
        let run = self.clone();

        thread::spawn(move || {
            thread::sleep(delay);
            if run.running() {
                info!("Timeout reached ({}s), terminating...", delay.as_secs());
                run.terminate();
            }
        });
    }

    /// Get a new cancellation channel, receiving a message when termination
    /// is requested. If termination was already requested the message is
    /// already queued.
    pub(crate) fn cancel_channel(&self) -> Result<Receiver<()>> {
        let (tx, rx) = bounded(1);
        let mut cancels = self
            .cancels
            .lock()
            .map_err(|_| anyhow!("Cancellation list lock is poisoned"))?;

        if !self.running() {
            let _ = tx.try_send(());
        }
        cancels.push(tx);
        Ok(rx)
    }

    pub(crate) fn running(&self) -> bool {
        !self.condition.load(Ordering::Relaxed)
    }

    pub(crate) fn terminate(&self) {
        // Hold the lock while flipping the flag so a concurrent
        // cancel_channel() sees either the flag or gets notified below.
        let cancels = self.cancels.lock();

        self.condition.store(true, Ordering::Relaxed);
        if let Ok(cancels) = cancels {
            cancels.iter().for_each(|tx| {
                let _ = tx.try_send(());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_notifies_channels() {
        let run = Running::new();
        let first = run.cancel_channel().unwrap();
        let second = run.cancel_channel().unwrap();

        assert!(run.running());
        assert!(first.try_recv().is_err());

        run.terminate();
        assert!(!run.running());
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());

        // Pending notifications do not pile up.
        run.terminate();
        run.terminate();
        assert!(first.try_recv().is_ok());
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn late_channel_is_already_cancelled() {
        let run = Running::new();
        run.terminate();

        assert!(run.cancel_channel().unwrap().try_recv().is_ok());
    }

    #[test]
    fn terminate_after_delay() {
        let run = Running::new();
        let cancel = run.cancel_channel().unwrap();

        run.terminate_after(Duration::from_millis(10));
        assert!(cancel.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(!run.running());
    }
}
