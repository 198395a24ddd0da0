//! Per-consumer delivery queues and the handles returned to callers.

use crate::error::{FirehoseError, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::envelope::Envelope;
use super::manager::Command;
use super::signal::Signal;

/// Predicate deciding whether a subscriber receives an envelope.
pub type Filter = Box<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Outcome of a non-blocking live delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Full,
    Disconnected,
}

/// A consumer's bounded queue, filter, and liveness signal.
///
/// The actor writes live traffic, the replay thread writes history before
/// registration, and only the consumer reads.
pub(crate) struct Subscriber {
    outgoing: Sender<Arc<Envelope>>,
    filter: Filter,
    done: Arc<Signal>,
}

impl Subscriber {
    pub(crate) fn new(buffer_size: usize, filter: Filter) -> (Arc<Self>, Receiver<Arc<Envelope>>) {
        let (outgoing, incoming) = bounded(buffer_size.max(1));
        let sub = Subscriber {
            outgoing,
            filter,
            done: Arc::new(Signal::new()),
        };
        (Arc::new(sub), incoming)
    }

    pub(crate) fn accepts(&self, envelope: &Envelope) -> bool {
        (self.filter)(envelope)
    }

    /// Live path: never blocks.
    pub(crate) fn try_deliver(&self, envelope: &Arc<Envelope>) -> Delivery {
        match self.outgoing.try_send(Arc::clone(envelope)) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }

    /// Replay path: blocks for queue space, but gives up with
    /// `PlaybackShutdown` once the consumer disconnects or `closed` fires.
    pub(crate) fn deliver_blocking(&self, envelope: Arc<Envelope>, closed: &Receiver<()>) -> Result<()> {
        if self.done.is_fired() {
            return Err(FirehoseError::PlaybackShutdown);
        }
        select! {
            send(self.outgoing, envelope) -> res => res.map_err(|_| FirehoseError::PlaybackShutdown),
            recv(self.done.receiver()) -> _ => Err(FirehoseError::PlaybackShutdown),
            recv(closed) -> _ => Err(FirehoseError::PlaybackShutdown),
        }
    }

    pub(crate) fn disconnect(&self) {
        self.done.fire();
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.done.is_fired()
    }

    pub(crate) fn queued(&self) -> usize {
        self.outgoing.len()
    }

    pub(crate) fn liveness(&self) -> Arc<Signal> {
        Arc::clone(&self.done)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("queued", &self.queued())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Cancels a subscription from any thread.
///
/// Each call marks the subscriber disconnected and asks the actor to drop
/// it. Repeated calls are harmless: unsubscribing an absent subscriber is a
/// no-op. The handle holds the subscriber weakly so that its queue closes
/// once the manager lets go of it.
#[derive(Clone)]
pub struct CancelHandle {
    sub: Weak<Subscriber>,
    done: Arc<Signal>,
    ops: Sender<Command>,
    closed: Receiver<()>,
}

impl CancelHandle {
    pub(crate) fn new(sub: &Arc<Subscriber>, ops: Sender<Command>, closed: Receiver<()>) -> Self {
        Self {
            sub: Arc::downgrade(sub),
            done: sub.liveness(),
            ops,
            closed,
        }
    }

    pub fn cancel(&self) {
        self.done.fire();
        // Gone means neither the actor nor a replay thread still holds it.
        let Some(sub) = self.sub.upgrade() else {
            return;
        };
        select! {
            send(self.ops, Command::Unsubscribe(sub)) -> _ => {}
            recv(self.closed) -> _ => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.done.is_fired()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle to a live subscription.
///
/// Dropping it cancels the subscription unless it was already cancelled or
/// split with [`Subscription::into_parts`].
pub struct Subscription {
    receiver: Receiver<Arc<Envelope>>,
    cancel: CancelHandle,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(receiver: Receiver<Arc<Envelope>>, cancel: CancelHandle) -> Self {
        Self {
            receiver,
            cancel,
            detached: false,
        }
    }

    /// Receive the next envelope (blocking).
    pub fn recv(&self) -> std::result::Result<Arc<Envelope>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an envelope (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Arc<Envelope>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Arc<Envelope>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn iter(&self) -> crossbeam_channel::Iter<'_, Arc<Envelope>> {
        self.receiver.iter()
    }

    pub fn receiver(&self) -> &Receiver<Arc<Envelope>> {
        &self.receiver
    }

    /// Number of envelopes waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Split into the raw queue and its cancel handle. The caller becomes
    /// responsible for cancelling.
    pub fn into_parts(mut self) -> (Receiver<Arc<Envelope>>, CancelHandle) {
        self.detached = true;
        (self.receiver.clone(), self.cancel.clone())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached && !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queued", &self.receiver.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::filters;

    #[test]
    fn test_try_deliver_drops_when_full() {
        let (sub, rx) = Subscriber::new(2, filters::all());
        let env = Arc::new(Envelope::info("a", "b"));

        assert_eq!(sub.try_deliver(&env), Delivery::Delivered);
        assert_eq!(sub.try_deliver(&env), Delivery::Delivered);
        assert_eq!(sub.try_deliver(&env), Delivery::Full);
        assert_eq!(rx.len(), 2);

        drop(rx);
        assert_eq!(sub.try_deliver(&env), Delivery::Disconnected);
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let (sub, _rx) = Subscriber::new(0, filters::all());
        let env = Arc::new(Envelope::info("a", "b"));
        assert_eq!(sub.try_deliver(&env), Delivery::Delivered);
    }

    #[test]
    fn test_blocking_delivery_aborts_on_disconnect() {
        let (sub, _rx) = Subscriber::new(1, filters::all());
        let closed = Signal::new();
        let env = Arc::new(Envelope::info("a", "b"));

        sub.deliver_blocking(Arc::clone(&env), closed.receiver()).unwrap();

        let blocked = Arc::clone(&sub);
        let closed_rx = closed.receiver().clone();
        let env2 = Arc::clone(&env);
        let waiter = std::thread::spawn(move || blocked.deliver_blocking(env2, &closed_rx));

        std::thread::sleep(Duration::from_millis(20));
        sub.disconnect();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(FirehoseError::PlaybackShutdown)));
    }

    #[test]
    fn test_blocking_delivery_aborts_on_shutdown() {
        let (sub, _rx) = Subscriber::new(1, filters::all());
        let closed = Signal::new();
        let env = Arc::new(Envelope::info("a", "b"));

        sub.deliver_blocking(Arc::clone(&env), closed.receiver()).unwrap();
        closed.fire();

        let result = sub.deliver_blocking(env, closed.receiver());
        assert!(matches!(result, Err(FirehoseError::PlaybackShutdown)));
    }
}
