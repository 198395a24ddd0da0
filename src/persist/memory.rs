//! In-memory persister.

use crate::error::Result;
use crate::events::Envelope;
use crate::types::Sequence;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{sequence_for, EventPersistence};

#[derive(Default)]
struct MemState {
    last: Sequence,
    /// Stored envelopes in strictly increasing sequence order.
    events: Vec<Arc<Envelope>>,
}

/// Keeps every sequenced envelope in memory.
#[derive(Default)]
pub struct MemPersister {
    state: Mutex<MemState>,
}

impl MemPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence stored so far.
    pub fn last_seq(&self) -> Sequence {
        self.state.lock().last
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventPersistence for MemPersister {
    fn persist(&self, envelope: &mut Envelope) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(seq) = sequence_for(envelope, state.last)? {
            state.last = seq;
            state.events.push(Arc::new(envelope.clone()));
        }
        Ok(())
    }

    fn playback(
        &self,
        since: Sequence,
        callback: &mut dyn FnMut(Arc<Envelope>) -> Result<()>,
    ) -> Result<()> {
        // Snapshot under the lock; the callback may block on a slow consumer.
        let pending: Vec<Arc<Envelope>> = {
            let state = self.state.lock();
            let start = state
                .events
                .partition_point(|e| e.seq().unwrap_or_default() <= since);
            state.events[start..].to_vec()
        };

        for envelope in pending {
            callback(envelope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FirehoseError;
    use crate::events::{LabelBatch, RepoAppend};

    fn append(repo: &str) -> Envelope {
        Envelope::repo_append(RepoAppend {
            seq: Sequence::UNASSIGNED,
            event: "repo_append".into(),
            repo: repo.into(),
            commit: "bafy".into(),
            prev: None,
            ops: vec![],
            blocks: vec![],
            too_big: false,
            blobs: vec![],
            time: String::new(),
        })
    }

    fn collect(mem: &MemPersister, since: i64) -> Vec<i64> {
        let mut seen = Vec::new();
        mem.playback(Sequence(since), &mut |e| {
            seen.push(e.seq().unwrap().0);
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_persist_assigns_sequence() {
        let mem = MemPersister::new();
        for _ in 0..3 {
            let mut env = append("did:A");
            mem.persist(&mut env).unwrap();
        }

        let mut labels = Envelope::label_batch(LabelBatch {
            seq: Sequence::UNASSIGNED,
            labels: vec![],
        });
        mem.persist(&mut labels).unwrap();
        assert_eq!(labels.seq(), Some(Sequence(4)));
        assert_eq!(mem.last_seq(), Sequence(4));
    }

    #[test]
    fn test_sequence_space_exhausted() {
        let mem = MemPersister::new();
        let mut last = append("did:A");
        last.assign_seq(Sequence(i64::MAX));
        mem.persist(&mut last).unwrap();

        let result = mem.persist(&mut append("did:A"));
        assert!(matches!(result, Err(FirehoseError::InvalidSequence(_, _))));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.last_seq(), Sequence(i64::MAX));
    }

    #[test]
    fn test_frames_not_stored() {
        let mem = MemPersister::new();
        mem.persist(&mut Envelope::info("a", "b")).unwrap();
        mem.persist(&mut Envelope::error("a", "b")).unwrap();
        assert!(mem.is_empty());
    }

    #[test]
    fn test_playback_after_since() {
        let mem = MemPersister::new();
        for _ in 0..5 {
            mem.persist(&mut append("did:A")).unwrap();
        }

        assert_eq!(collect(&mem, 3), vec![4, 5]);
        assert_eq!(collect(&mem, 0), vec![1, 2, 3, 4, 5]);
        assert!(collect(&mem, 5).is_empty());
        assert!(collect(&mem, 99).is_empty());
    }

    #[test]
    fn test_playback_stops_on_callback_error() {
        let mem = MemPersister::new();
        for _ in 0..5 {
            mem.persist(&mut append("did:A")).unwrap();
        }

        let mut calls = 0;
        let result = mem.playback(Sequence(0), &mut |_| {
            calls += 1;
            if calls == 2 {
                Err(FirehoseError::PlaybackShutdown)
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(FirehoseError::PlaybackShutdown)));
        assert_eq!(calls, 2);
    }
}
