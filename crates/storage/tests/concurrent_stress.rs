//! Concurrent access stress tests for `MemoryBackingStore`.
//!
//! These tests exercise the set and pub/sub paths under multi-threaded
//! workloads to detect lost updates, reordering, and deadlocks:
//!
//! ```bash
//! cargo test -p paygate-storage --test concurrent_stress -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::collections::HashSet;

use paygate_storage::{BackingStore, MemoryBackingStore, ProviderName, RealmId, RefreshMessage};
use tokio::task::JoinSet;

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of operations each task performs.
const OPS_PER_TASK: usize = 100;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn message(task: usize, i: usize) -> RefreshMessage {
    RefreshMessage::mapping_change(
        ProviderName::new(format!("provider-{task}")).expect("provider"),
        RealmId::new(format!("realm-{i:06}")).expect("realm"),
    )
}

// ---------------------------------------------------------------------------
// Test: Parallel members added to one set (no lost updates)
// ---------------------------------------------------------------------------

/// Spawns `CONCURRENCY` tasks that each add `OPS_PER_TASK` distinct profiles
/// to the same realm set. Every profile must be present afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn parallel_add_members_same_set() {
    let store = MemoryBackingStore::new();
    let key = "tenant-profiles:alipay:R1";

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let store = store.clone();
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let member = format!("task{task_id}-profile{i}");
                store.add_members(key, &[member]).await.expect("add_members should succeed");
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let members: HashSet<String> =
        store.set_members(key).await.expect("set_members should succeed").into_iter().collect();
    assert_eq!(members.len(), CONCURRENCY * OPS_PER_TASK);
}

// ---------------------------------------------------------------------------
// Test: Per-publisher ordering is preserved for every subscriber
// ---------------------------------------------------------------------------

/// `CONCURRENCY` publishers each send `OPS_PER_TASK` messages while several
/// subscribers listen. Each subscriber must receive every message, and each
/// publisher's messages must arrive in publish order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn parallel_publishers_preserve_per_publisher_order() {
    let store = MemoryBackingStore::with_subscriber_buffer(CONCURRENCY * OPS_PER_TASK);
    let channel = "refresh";

    let mut subscriptions = Vec::new();
    for _ in 0..3 {
        subscriptions.push(store.subscribe(channel).await.expect("subscribe should succeed"));
    }

    let mut publishers = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let store = store.clone();
        publishers.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let delivered =
                    store.publish(channel, message(task_id, i)).await.expect("publish should succeed");
                assert_eq!(delivered, 3);
            }
        });
    }
    while let Some(result) = publishers.join_next().await {
        result.expect("publisher should not panic");
    }

    for mut rx in subscriptions {
        let mut next_realm = vec![0usize; CONCURRENCY];
        for _ in 0..CONCURRENCY * OPS_PER_TASK {
            let received = rx.recv().await.expect("message should be delivered");
            let task: usize = received
                .provider
                .as_str()
                .trim_start_matches("provider-")
                .parse()
                .expect("provider index");
            assert_eq!(received.realm_id.as_str(), format!("realm-{:06}", next_realm[task]));
            next_realm[task] += 1;
        }
        assert!(rx.try_recv().is_err(), "no extra messages expected");
    }
}

// ---------------------------------------------------------------------------
// Test: Subscribers joining and leaving while publishing
// ---------------------------------------------------------------------------

/// Subscribers are created and dropped while publishers run. Publishing must
/// never fail or deadlock, and dropped subscribers must be pruned.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn subscriber_churn_during_publish() {
    let store = MemoryBackingStore::new();
    let channel = "refresh";

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let store = store.clone();
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                if task_id % 2 == 0 {
                    let rx = store.subscribe(channel).await.expect("subscribe should succeed");
                    drop(rx);
                } else {
                    store.publish(channel, message(task_id, i)).await.expect("publish should succeed");
                }
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    assert_eq!(store.subscriber_count(channel), 0);
}
