//! Event manager: the actor that owns the subscriber set, and the facade
//! callers use to publish and subscribe.
//!
//! Every mutation of the subscriber set and every fan-out runs on one
//! dedicated thread, fed through a rendezvous channel. `publish` blocks
//! until the actor takes the command, which is the producer's only source
//! of backpressure. Live fan-out never blocks: a full subscriber queue
//! drops the envelope for that subscriber alone.
//!
//! # Replay and the registration gap
//!
//! `subscribe` with a `since` position replays history on a separate
//! thread straight from storage, then asks the actor to register the
//! subscriber for live traffic. An envelope persisted after playback took
//! its snapshot but fanned out before the registration is applied reaches
//! neither path, so a subscriber can miss a single event at the seam.
//! Registering first and replaying second would trade that gap for
//! duplicates; the gap is kept.

use crate::error::{FirehoseError, Result};
use crate::persist::EventPersistence;
use crate::types::Sequence;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::envelope::{Envelope, LabelBatch, Routing};
use super::filters;
use super::signal::Signal;
use super::subscriber::{CancelHandle, Delivery, Filter, Subscriber, Subscription};

/// Default per-subscriber queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Event manager configuration.
#[derive(Clone, Debug)]
pub struct EventManagerConfig {
    /// Queue capacity for every subscriber. Default: 1024
    pub buffer_size: usize,
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Envelopes fully processed (persisted and fanned out) by the actor.
    pub published: u64,
    /// Individual live deliveries.
    pub delivered: u64,
    /// Live deliveries dropped on a full queue.
    pub dropped: u64,
    pub persist_failures: u64,
    /// Currently registered subscribers.
    pub subscribers: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    persist_failures: AtomicU64,
    subscribers: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Requests handled by the actor.
pub(crate) enum Command {
    Subscribe(Arc<Subscriber>),
    Unsubscribe(Arc<Subscriber>),
    Send(Envelope),
}

/// Actor-side state. Only the actor thread ever touches `subs`.
struct Dispatcher {
    subs: Vec<Arc<Subscriber>>,
    persister: Arc<dyn EventPersistence>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    fn new(persister: Arc<dyn EventPersistence>, counters: Arc<Counters>) -> Self {
        Self {
            subs: Vec::new(),
            persister,
            counters,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe(sub) => self.subscribe(sub),
            Command::Unsubscribe(sub) => self.unsubscribe(&sub),
            Command::Send(envelope) => self.send(envelope),
        }
    }

    fn subscribe(&mut self, sub: Arc<Subscriber>) {
        // Cancelled while replaying; its Unsubscribe may already be gone.
        if sub.is_disconnected() {
            tracing::debug!("skipping registration of cancelled subscriber");
            return;
        }
        self.subs.push(sub);
        self.sync_subscriber_count();
    }

    fn unsubscribe(&mut self, sub: &Arc<Subscriber>) {
        if let Some(pos) = self.subs.iter().position(|s| Arc::ptr_eq(s, sub)) {
            self.subs.swap_remove(pos);
            self.sync_subscriber_count();
        }
    }

    fn send(&mut self, mut envelope: Envelope) {
        if let Err(e) = self.persister.persist(&mut envelope) {
            self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, kind = ?envelope.kind(), "failed to persist outbound event");
        }

        let envelope = Arc::new(envelope);
        for sub in &self.subs {
            if sub.is_disconnected() || !sub.accepts(&envelope) {
                continue;
            }
            match sub.try_deliver(&envelope) {
                Delivery::Delivered => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Delivery::Full => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(queued = sub.queued(), seq = ?envelope.seq(), "event overflow");
                }
                Delivery::Disconnected => {
                    tracing::debug!(seq = ?envelope.seq(), "subscriber queue closed, awaiting unsubscribe");
                }
            }
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
    }

    fn sync_subscriber_count(&self) {
        self.counters
            .subscribers
            .store(self.subs.len() as u64, Ordering::Relaxed);
    }

    fn run(mut self, ops: Receiver<Command>, closed: Receiver<()>) {
        tracing::debug!("event manager running");
        loop {
            select! {
                recv(ops) -> command => match command {
                    Ok(command) => self.handle(command),
                    Err(_) => break,
                },
                recv(closed) -> _ => break,
            }
        }

        // Dropping the senders lets consumers see end-of-stream once drained.
        self.subs.clear();
        self.sync_subscriber_count();
        tracing::debug!("event manager stopped");
    }
}

/// Historical catch-up for one subscriber, followed by live registration.
struct ReplayTask {
    sub: Arc<Subscriber>,
    since: Option<Sequence>,
    persister: Arc<dyn EventPersistence>,
    ops: Sender<Command>,
    closed: Receiver<()>,
}

impl ReplayTask {
    fn run(self) {
        if let Some(since) = self.since {
            self.replay(since);
        }

        let ReplayTask { sub, ops, closed, .. } = self;
        select! {
            send(ops, Command::Subscribe(sub)) -> res => {
                if res.is_err() {
                    tracing::warn!("failed to subscribe, event manager shut down");
                }
            }
            recv(closed) -> _ => {
                tracing::warn!("failed to subscribe, event manager shut down");
            }
        }
    }

    fn replay(&self, since: Sequence) {
        let sub = &self.sub;
        let closed = &self.closed;
        let mut replayed = 0u64;

        let result = self.persister.playback(since, &mut |envelope| {
            sub.deliver_blocking(envelope, closed)?;
            replayed += 1;
            Ok(())
        });

        match result {
            Ok(()) => tracing::debug!(%since, replayed, "events playback complete"),
            Err(FirehoseError::PlaybackShutdown) => {
                tracing::debug!(%since, replayed, "events playback: playback shutting down")
            }
            Err(e) => tracing::error!(%since, replayed, error = %e, "events playback failed"),
        }
    }
}

/// Fan-out hub for stream events.
///
/// Dropping the manager shuts it down.
pub struct EventManager {
    ops: Sender<Command>,
    closed: Signal,
    persister: Arc<dyn EventPersistence>,
    counters: Arc<Counters>,
    buffer_size: usize,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl EventManager {
    /// Start the actor thread.
    pub fn start(persister: Arc<dyn EventPersistence>, config: EventManagerConfig) -> Result<Self> {
        let (ops, incoming) = bounded(0);
        let closed = Signal::new();
        let counters = Arc::new(Counters::default());

        let dispatcher = Dispatcher::new(Arc::clone(&persister), Arc::clone(&counters));
        let closed_rx = closed.receiver().clone();
        let actor = thread::Builder::new()
            .name("event-manager".into())
            .spawn(move || dispatcher.run(incoming, closed_rx))
            .map_err(|e| FirehoseError::Spawn("event-manager", e))?;

        Ok(Self {
            ops,
            closed,
            persister,
            counters,
            buffer_size: config.buffer_size.max(1),
            actor: Mutex::new(Some(actor)),
        })
    }

    /// Start with the default configuration.
    pub fn with_persister(persister: Arc<dyn EventPersistence>) -> Result<Self> {
        Self::start(persister, EventManagerConfig::default())
    }

    /// Persist and fan out one envelope.
    ///
    /// Blocks until the actor accepts it. Fails only with
    /// [`FirehoseError::Shutdown`].
    pub fn publish(&self, envelope: Envelope) -> Result<()> {
        let _span = tracing::debug_span!("publish", kind = ?envelope.kind()).entered();

        if self.closed.is_fired() {
            return Err(FirehoseError::Shutdown);
        }

        select! {
            send(self.ops, Command::Send(envelope)) -> res => res.map_err(|_| FirehoseError::Shutdown),
            recv(self.closed.receiver()) -> _ => Err(FirehoseError::Shutdown),
        }
    }

    /// Publish a label batch.
    pub fn publish_label(&self, batch: LabelBatch, routing: Routing) -> Result<()> {
        self.publish(Envelope::label_batch(batch).with_routing(routing))
    }

    /// Subscribe to the stream.
    ///
    /// `filter` defaults to accepting everything. With `since`, stored
    /// envelopes after that sequence are replayed (blocking on queue space,
    /// never dropping) before live delivery starts. Registration happens
    /// asynchronously; see the module docs for the gap this leaves.
    pub fn subscribe(&self, filter: Option<Filter>, since: Option<Sequence>) -> Result<Subscription> {
        if self.closed.is_fired() {
            return Err(FirehoseError::Shutdown);
        }

        let filter = filter.unwrap_or_else(filters::all);
        let (sub, receiver) = Subscriber::new(self.buffer_size, filter);

        let task = ReplayTask {
            sub: Arc::clone(&sub),
            since,
            persister: Arc::clone(&self.persister),
            ops: self.ops.clone(),
            closed: self.closed.receiver().clone(),
        };
        thread::Builder::new()
            .name("event-playback".into())
            .spawn(move || task.run())
            .map_err(|e| FirehoseError::Spawn("event-playback", e))?;

        let cancel = CancelHandle::new(&sub, self.ops.clone(), self.closed.receiver().clone());
        Ok(Subscription::new(receiver, cancel))
    }

    /// Stop accepting commands and wait for the actor to exit.
    ///
    /// Idempotent. Blocked publishers, registrations, and cancellations all
    /// return promptly once this starts.
    pub fn shutdown(&self) {
        if self.closed.fire() {
            tracing::info!("event manager shutting down");
        }

        let handle = self.actor.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("event manager thread panicked");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.is_fired()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn stats(&self) -> ManagerStats {
        self.counters.snapshot()
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
