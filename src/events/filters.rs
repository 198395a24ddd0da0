//! Stock subscription filters.

use crate::types::{AccountId, EventKind, ServerId};

use super::envelope::Envelope;
use super::subscriber::Filter;

/// Accept everything.
pub fn all() -> Filter {
    Box::new(|_: &Envelope| true)
}

/// Repo events for a single repo DID.
pub fn repo(did: impl Into<String>) -> Filter {
    let did = did.into();
    Box::new(move |env: &Envelope| env.repo() == Some(did.as_str()))
}

/// Events owned by one account.
pub fn account(account: AccountId) -> Filter {
    Box::new(move |env: &Envelope| env.routing().account == account)
}

/// Events relevant to a hosting server.
pub fn server(server: ServerId) -> Filter {
    Box::new(move |env: &Envelope| env.is_relevant_to(server))
}

/// Events of the given kinds.
pub fn kinds(kinds: &[EventKind]) -> Filter {
    let kinds = kinds.to_vec();
    Box::new(move |env: &Envelope| kinds.contains(&env.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::envelope::{LabelBatch, RepoAppend, Routing};
    use crate::types::Sequence;

    fn append_for(repo: &str) -> Envelope {
        Envelope::repo_append(RepoAppend {
            seq: Sequence(1),
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

    #[test]
    fn test_repo_filter() {
        let f = repo("did:A");
        assert!(f(&append_for("did:A")));
        assert!(!f(&append_for("did:B")));
        assert!(!f(&Envelope::info("x", "y")));
    }

    #[test]
    fn test_routing_filters() {
        let env = append_for("did:A").with_routing(Routing {
            account: AccountId(5),
            server: ServerId(2),
            relevant_servers: vec![ServerId(2), ServerId(3)],
        });

        assert!(account(AccountId(5))(&env));
        assert!(!account(AccountId(6))(&env));
        assert!(server(ServerId(3))(&env));
        assert!(!server(ServerId(9))(&env));
    }

    #[test]
    fn test_kind_filter() {
        let f = kinds(&[EventKind::LabelBatch, EventKind::ErrorFrame]);
        assert!(f(&Envelope::label_batch(LabelBatch {
            seq: Sequence(1),
            labels: vec![],
        })));
        assert!(f(&Envelope::error("e", "m")));
        assert!(!f(&append_for("did:A")));
        assert!(all()(&append_for("did:A")));
    }
}
