//! One-shot broadcast signal.
//!
//! Firing drops the only sender of a zero-capacity channel, so every clone
//! of the receiver becomes permanently ready. Blocking channel operations
//! can race it inside `crossbeam_channel::select!`.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

pub(crate) struct Signal {
    trigger: Mutex<Option<Sender<()>>>,
    fired: Receiver<()>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        let (trigger, fired) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            fired,
        }
    }

    /// Fire the signal. Returns true only for the call that fired it.
    pub(crate) fn fire(&self) -> bool {
        self.trigger.lock().take().is_some()
    }

    pub(crate) fn is_fired(&self) -> bool {
        matches!(self.fired.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver that becomes ready once fired. Never yields a value.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.fired
    }
}
