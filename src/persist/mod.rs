//! Durable storage behind the event manager.
//!
//! The manager only needs two things from storage: append an envelope
//! (assigning its sequence number) and replay everything after a given
//! sequence. Two backends are provided:
//! - [`MemPersister`]: in-memory, for tests and ephemeral relays
//! - [`EventLog`]: append-only checksummed file

mod log;
mod memory;

pub use log::EventLog;
pub use memory::MemPersister;

use crate::error::{FirehoseError, Result};
use crate::events::Envelope;
use crate::types::Sequence;
use std::sync::Arc;

/// Storage collaborator consumed by the event manager.
///
/// `persist` is only ever called from the actor thread, one envelope at a
/// time. `playback` runs on replay threads concurrently with `persist`.
pub trait EventPersistence: Send + Sync {
    /// Durably append one envelope, assigning or confirming its sequence.
    fn persist(&self, envelope: &mut Envelope) -> Result<()>;

    /// Invoke `callback` for every stored envelope with `seq > since`, in
    /// increasing order. The first callback error stops playback and is
    /// returned unchanged; `FirehoseError::PlaybackShutdown` is a clean
    /// abort, not a storage failure.
    fn playback(
        &self,
        since: Sequence,
        callback: &mut dyn FnMut(Arc<Envelope>) -> Result<()>,
    ) -> Result<()>;
}

/// Decide the sequence number for an envelope about to be stored.
///
/// Unassigned envelopes take `last + 1`; pre-assigned ones must move
/// forward. Returns `None` for kinds that are not stored (control frames).
pub(crate) fn sequence_for(envelope: &mut Envelope, last: Sequence) -> Result<Option<Sequence>> {
    let Some(current) = envelope.seq() else {
        return Ok(None);
    };

    if !current.is_assigned() {
        let seq = last
            .next()
            .ok_or(FirehoseError::InvalidSequence(current, last))?;
        envelope.assign_seq(seq);
        return Ok(Some(seq));
    }

    if current <= last {
        return Err(FirehoseError::InvalidSequence(current, last));
    }

    Ok(Some(current))
}
