//! # Repo Firehose
//!
//! In-process fan-out core for a stream of repository change events.
//!
//! ## Core Concepts
//!
//! - **Envelopes**: repo appends, label batches, and info/error frames, plus
//!   routing metadata used only for filtering
//! - **Event manager**: a single actor thread that persists each published
//!   envelope and fans it out to every matching subscriber
//! - **Subscriptions**: bounded queues with an optional replay of stored
//!   history before live delivery begins
//! - **Persistence**: pluggable storage with sequence assignment and ranged
//!   playback
//!
//! ## Example
//!
//! ```ignore
//! use firehose::{filters, EventLog, EventManager, EventManagerConfig};
//! use std::sync::Arc;
//!
//! let log = Arc::new(EventLog::open("./firehose-data")?);
//! let manager = EventManager::start(log, EventManagerConfig::default())?;
//!
//! let sub = manager.subscribe(Some(filters::repo("did:plc:alice")), None)?;
//! manager.publish(envelope)?;
//!
//! let received = sub.recv()?;
//! manager.shutdown();
//! ```

pub mod error;
pub mod events;
pub mod persist;
pub mod types;

// Re-exports
pub use error::{FirehoseError, Result};
pub use events::{
    filters, CancelHandle, Envelope, ErrorFrame, EventManager, EventManagerConfig, Filter,
    InfoFrame, Label, LabelBatch, ManagerStats, OpAction, RepoAppend, RepoOp, Routing,
    StreamEvent, Subscription, DEFAULT_BUFFER_SIZE,
};
pub use persist::{EventLog, EventPersistence, MemPersister};
pub use types::*;
