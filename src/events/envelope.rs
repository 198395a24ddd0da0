//! Stream event data model.

use crate::types::{AccountId, EventHeader, EventKind, Sequence, ServerId};
use serde::{Deserialize, Serialize};

/// Opaque label payload. The firehose never inspects labels.
pub type Label = serde_json::Value;

/// One durable change to a repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepoAppend {
    pub seq: Sequence,
    pub event: String,
    /// DID of the repo this event is about.
    pub repo: String,
    pub commit: String,
    /// Previous commit, absent for the repo's first commit.
    pub prev: Option<String>,
    pub ops: Vec<RepoOp>,
    pub blocks: Vec<u8>,
    #[serde(rename = "tooBig")]
    pub too_big: bool,
    pub blobs: Vec<String>,
    pub time: String,
}

/// A path-level operation within a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepoOp {
    pub path: String,
    pub action: OpAction,
    pub cid: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelBatch {
    pub seq: Sequence,
    pub labels: Vec<Label>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoFrame {
    pub info: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub message: String,
}

/// Exactly one kind of stream event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    RepoAppend(RepoAppend),
    Info(InfoFrame),
    Error(ErrorFrame),
    LabelBatch(LabelBatch),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::RepoAppend(_) => EventKind::RepoAppend,
            StreamEvent::Info(_) => EventKind::InfoFrame,
            StreamEvent::Error(_) => EventKind::ErrorFrame,
            StreamEvent::LabelBatch(_) => EventKind::LabelBatch,
        }
    }
}

/// Routing metadata used by filters. Never part of the event payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub account: AccountId,
    pub server: ServerId,
    pub relevant_servers: Vec<ServerId>,
}

/// A stream event plus its routing metadata.
///
/// Envelopes are shared as `Arc<Envelope>` once published, so the only
/// mutation available is sequence assignment while the persister still
/// holds it exclusively.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    event: StreamEvent,
    routing: Routing,
}

impl Envelope {
    pub fn new(event: StreamEvent) -> Self {
        Self {
            event,
            routing: Routing::default(),
        }
    }

    pub fn repo_append(append: RepoAppend) -> Self {
        Self::new(StreamEvent::RepoAppend(append))
    }

    pub fn label_batch(batch: LabelBatch) -> Self {
        Self::new(StreamEvent::LabelBatch(batch))
    }

    pub fn info(info: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StreamEvent::Info(InfoFrame {
            info: info.into(),
            message: message.into(),
        }))
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StreamEvent::Error(ErrorFrame {
            error: error.into(),
            message: message.into(),
        }))
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn event(&self) -> &StreamEvent {
        &self.event
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn into_parts(self) -> (StreamEvent, Routing) {
        (self.event, self.routing)
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn header(&self) -> EventHeader {
        self.kind().into()
    }

    /// Sequence number, for the kinds that carry one.
    pub fn seq(&self) -> Option<Sequence> {
        match &self.event {
            StreamEvent::RepoAppend(append) => Some(append.seq),
            StreamEvent::LabelBatch(batch) => Some(batch.seq),
            StreamEvent::Info(_) | StreamEvent::Error(_) => None,
        }
    }

    /// Set the sequence number. Returns false for kinds without one.
    pub fn assign_seq(&mut self, seq: Sequence) -> bool {
        match &mut self.event {
            StreamEvent::RepoAppend(append) => {
                append.seq = seq;
                true
            }
            StreamEvent::LabelBatch(batch) => {
                batch.seq = seq;
                true
            }
            StreamEvent::Info(_) | StreamEvent::Error(_) => false,
        }
    }

    /// Repo DID for repo events.
    pub fn repo(&self) -> Option<&str> {
        match &self.event {
            StreamEvent::RepoAppend(append) => Some(&append.repo),
            _ => None,
        }
    }

    pub fn is_relevant_to(&self, server: ServerId) -> bool {
        self.routing.relevant_servers.contains(&server)
    }
}
