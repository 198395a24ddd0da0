//! Concurrency and scaling tests.
//!
//! These exercise the manager under concurrent subscribe/cancel churn and
//! many simultaneous consumers.

use firehose::{
    filters, Envelope, EventManager, EventManagerConfig, EventPersistence, MemPersister,
    RepoAppend, Sequence,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn repo_append(repo: &str) -> Envelope {
    Envelope::repo_append(RepoAppend {
        seq: Sequence::UNASSIGNED,
        event: "repo_append".to_string(),
        repo: repo.to_string(),
        commit: "bafyrei-commit".to_string(),
        prev: None,
        ops: vec![],
        blocks: vec![0u8; 64],
        too_big: false,
        blobs: vec![],
        time: "2024-01-01T00:00:00Z".to_string(),
    })
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(2));
    }
}

fn assert_strictly_increasing(seqs: &[i64]) {
    assert!(
        seqs.windows(2).all(|w| w[0] < w[1]),
        "sequence not strictly increasing: {:?}",
        seqs
    );
}

#[test]
fn test_churn_never_duplicates_or_reorders() {
    let manager = Arc::new(
        EventManager::start(
            Arc::new(MemPersister::new()),
            EventManagerConfig { buffer_size: 4096 },
        )
        .unwrap(),
    );

    let stable = manager.subscribe(None, None).unwrap();
    wait_until(|| manager.stats().subscribers == 1);

    let running = Arc::new(AtomicBool::new(true));
    let churners: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut rounds = 0;
                loop {
                    // Half replay from the start, half go live only.
                    let since = if (i + rounds) % 2 == 0 { Some(Sequence(0)) } else { None };
                    let sub = manager.subscribe(None, since).unwrap();
                    thread::sleep(Duration::from_millis(1));
                    sub.cancel();

                    let seqs: Vec<i64> = sub
                        .receiver()
                        .try_iter()
                        .map(|e| e.seq().unwrap().0)
                        .collect();
                    assert_strictly_increasing(&seqs);
                    rounds += 1;
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                }
                rounds
            })
        })
        .collect();

    for _ in 0..500 {
        manager.publish(repo_append("did:A")).unwrap();
    }

    running.store(false, Ordering::Relaxed);
    for handle in churners {
        assert!(handle.join().unwrap() > 0);
    }

    let seqs: Vec<i64> = (0..500)
        .map(|_| stable.recv_timeout(TIMEOUT).unwrap().seq().unwrap().0)
        .collect();
    assert_eq!(seqs, (1..=500).collect::<Vec<_>>());

    wait_until(|| manager.stats().subscribers == 1);
}

#[test]
fn test_many_consumers_with_filters() {
    let manager = Arc::new(EventManager::with_persister(Arc::new(MemPersister::new())).unwrap());
    let repos = ["did:A", "did:B", "did:C", "did:D"];

    let consumers: Vec<_> = (0..32)
        .map(|i| {
            let repo = repos[i % repos.len()];
            (repo, manager.subscribe(Some(filters::repo(repo)), None).unwrap())
        })
        .collect();
    wait_until(|| manager.stats().subscribers == 32);

    for round in 0..100 {
        manager.publish(repo_append(repos[round % repos.len()])).unwrap();
    }

    let readers: Vec<_> = consumers
        .into_iter()
        .map(|(repo, sub)| {
            thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    let env = sub.recv_timeout(TIMEOUT).unwrap();
                    assert_eq!(env.repo(), Some(repo));
                    seen.push(env.seq().unwrap().0);
                }
                assert!(sub.try_recv().is_err());
                seen
            })
        })
        .collect();

    for reader in readers {
        let seen = reader.join().unwrap();
        assert_strictly_increasing(&seen);
        assert_eq!(seen.len(), 25);
    }

    wait_until(|| manager.stats().published == 100);
    let stats = manager.stats();
    assert_eq!(stats.delivered, 100 * 8);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn test_concurrent_replays_see_full_history() {
    let store = Arc::new(MemPersister::new());
    for _ in 0..1000 {
        store.persist(&mut repo_append("did:A")).unwrap();
    }

    let manager = Arc::new(
        EventManager::start(store, EventManagerConfig { buffer_size: 16 }).unwrap(),
    );

    let replayers: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let since = i * 100;
                let sub = manager.subscribe(None, Some(Sequence(since))).unwrap();
                let seqs: Vec<i64> = (since + 1..=1000)
                    .map(|_| sub.recv_timeout(TIMEOUT).unwrap().seq().unwrap().0)
                    .collect();
                assert_eq!(seqs, (since + 1..=1000).collect::<Vec<_>>());
                sub
            })
        })
        .collect();

    let subs: Vec<_> = replayers.into_iter().map(|h| h.join().unwrap()).collect();
    wait_until(|| manager.stats().subscribers == 8);

    manager.publish(repo_append("did:A")).unwrap();
    let mut live = HashSet::new();
    for sub in &subs {
        live.insert(sub.recv_timeout(TIMEOUT).unwrap().seq().unwrap().0);
    }
    assert_eq!(live.into_iter().collect::<Vec<_>>(), vec![1001]);
}
