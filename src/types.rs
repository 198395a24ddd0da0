//! Core identifier and tag types shared across the firehose.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the event stream, assigned at persist time.
///
/// Zero means "not yet assigned".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sequence(pub i64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub const UNASSIGNED: Sequence = Sequence(0);

    /// The following sequence, or `None` once the stream is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Sequence)
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

/// Internal identifier of the account that owns an event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AccountId(pub u64);

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internal identifier of a hosting server.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ServerId(pub u64);

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({})", self.0)
    }
}

/// Stream event kind. The numeric codes are part of the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ErrorFrame,
    RepoAppend,
    InfoFrame,
    LabelBatch,
}

impl EventKind {
    pub fn code(self) -> i64 {
        match self {
            EventKind::ErrorFrame => -1,
            EventKind::RepoAppend => 1,
            EventKind::InfoFrame => 2,
            EventKind::LabelBatch => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(EventKind::ErrorFrame),
            1 => Some(EventKind::RepoAppend),
            2 => Some(EventKind::InfoFrame),
            3 => Some(EventKind::LabelBatch),
            _ => None,
        }
    }
}

/// Frame header preceding each event body on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub op: i64,
}

impl From<EventKind> for EventHeader {
    fn from(kind: EventKind) -> Self {
        EventHeader { op: kind.code() }
    }
}
