//! Concurrent consumers sharing one vault.
//!
//! Each thread stands in for an independent watcher process; the only
//! coordination between them is the rename that claims a task.

use std::thread;

use taskloop::core::types::Queue;
use taskloop::io::claim::Claim;
use taskloop::test_support::TestVault;
use taskloop::triage::triage_task;
use taskloop::watch::inbox::InboxWatcher;
use taskloop::watch::run_cycle;

const CONSUMERS: usize = 8;

#[test]
fn exactly_one_claim_wins() {
    let tv = TestVault::new();
    let id = tv.add_task(Queue::NeedsAction, "RACE.md", "# Race\n\n## Steps\n- list files\n");

    let wins = thread::scope(|s| {
        let handles: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                s.spawn(|| {
                    let claim = tv
                        .vault
                        .claim("race", &id, Queue::NeedsAction)
                        .expect("claim attempt");
                    matches!(claim, Claim::Claimed(_))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|won| *won)
            .count()
    });

    assert_eq!(wins, 1);
    assert!(tv.vault.store.exists(Queue::InProgress, &id));
    assert!(!tv.vault.store.exists(Queue::NeedsAction, &id));
}

#[test]
fn contended_triage_routes_once() {
    let tv = TestVault::new();
    let id = tv.add_task(Queue::Inbox, "ONE.md", "# One\n\nshow the report\n");

    let routed = thread::scope(|s| {
        let handles: Vec<_> = (0..CONSUMERS)
            .map(|_| s.spawn(|| triage_task(&tv.vault, &id).expect("triage")))
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().expect("thread"))
            .count()
    });

    assert_eq!(routed, 1);
    let homes: Vec<Queue> = Queue::ALL
        .into_iter()
        .filter(|q| tv.vault.store.exists(*q, &id))
        .collect();
    assert_eq!(homes, [Queue::NeedsAction]);
}

#[test]
fn competing_watchers_process_each_task_once() {
    let tv = TestVault::new();
    for n in 0..20 {
        tv.add_task(
            Queue::Inbox,
            &format!("T{n:02}.md"),
            "# Task\n\nlist the files\n",
        );
    }

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut watcher = InboxWatcher::new(&tv.vault);
                run_cycle(&mut watcher, &tv.vault.audit)
            });
        }
    });

    assert!(tv.vault.store.list(Queue::Inbox).expect("list").is_empty());
    assert!(tv.vault.store.list(Queue::InProgress).expect("list").is_empty());
    assert_eq!(tv.vault.store.list(Queue::NeedsAction).expect("list").len(), 20);
    let routed = tv
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == "classify_and_route")
        .count();
    assert_eq!(routed, 20);
}
