//! Stream events and their live fan-out.
//!
//! This module provides:
//! - The envelope data model (repo appends, label batches, info/error frames)
//! - The event manager that persists and fans out published envelopes
//! - Subscriptions with optional historical replay from a sequence number
//!
//! Subscriptions support:
//! - Arbitrary filter predicates (see [`filters`])
//! - Replay of stored envelopes before live traffic
//! - Bounded queues: live envelopes are dropped on overflow, replay blocks
//!
//! # Example
//!
//! ```ignore
//! let manager = EventManager::with_persister(Arc::new(MemPersister::new()))?;
//!
//! // Everything for one repo, starting after sequence 100
//! let sub = manager.subscribe(Some(filters::repo("did:plc:alice")), Some(Sequence(100)))?;
//!
//! for envelope in sub.iter() {
//!     println!("{:?} {:?}", envelope.kind(), envelope.seq());
//! }
//! ```

pub mod filters;
mod envelope;
mod manager;
mod signal;
mod subscriber;

pub use envelope::{
    Envelope, ErrorFrame, InfoFrame, Label, LabelBatch, OpAction, RepoAppend, RepoOp, Routing,
    StreamEvent,
};
pub use manager::{EventManager, EventManagerConfig, ManagerStats, DEFAULT_BUFFER_SIZE};
pub use subscriber::{CancelHandle, Filter, Subscription};
