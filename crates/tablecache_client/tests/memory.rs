// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the `CacheClient` contract on `MemoryCacheClient`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::executor::block_on;
use tablecache_client::{CacheClient, ErrorKind, MemoryCacheClient};
use tick::{Clock, ClockControl};

#[test]
fn set_then_get_returns_value() {
    block_on(async {
        let client = MemoryCacheClient::new(Clock::new_frozen());
        client
            .set("key", Bytes::from_static(b"value"), Duration::from_secs(60))
            .await
            .expect("set failed");

        let value = client.get("key").await.expect("get failed");
        assert_eq!(value, Some(Bytes::from_static(b"value")));
    });
}

#[test]
fn set_overwrites_previous_value() {
    block_on(async {
        let client = MemoryCacheClient::new(Clock::new_frozen());
        client.set("key", Bytes::from_static(b"a"), Duration::from_secs(60)).await.expect("set failed");
        client.set("key", Bytes::from_static(b"b"), Duration::from_secs(60)).await.expect("set failed");

        assert_eq!(client.get("key").await.expect("get failed"), Some(Bytes::from_static(b"b")));
    });
}

#[test]
fn delete_is_idempotent() {
    block_on(async {
        let client = MemoryCacheClient::new(Clock::new_frozen());
        client.set("key", Bytes::from_static(b"a"), Duration::from_secs(60)).await.expect("set failed");

        client.delete("key").await.expect("delete failed");
        client.delete("key").await.expect("second delete failed");
        client.delete("never-set").await.expect("delete of absent key failed");

        assert!(client.get("key").await.expect("get failed").is_none());
    });
}

#[test]
fn ttl_is_measured_from_set() {
    block_on(async {
        let control = ClockControl::new();
        let client = MemoryCacheClient::new(control.to_clock());

        client.set("key", Bytes::from_static(b"a"), Duration::from_secs(5)).await.expect("set failed");
        control.advance(Duration::from_secs(4));
        client.set("key", Bytes::from_static(b"b"), Duration::from_secs(5)).await.expect("set failed");
        control.advance(Duration::from_secs(4));

        assert_eq!(client.get("key").await.expect("get failed"), Some(Bytes::from_static(b"b")));

        control.advance(Duration::from_secs(1));
        assert!(client.get("key").await.expect("get failed").is_none());
    });
}

#[test]
fn clones_share_storage() {
    block_on(async {
        let client = MemoryCacheClient::new(Clock::new_frozen());
        let clone = client.clone();

        client.set("key", Bytes::from_static(b"a"), Duration::from_secs(60)).await.expect("set failed");
        assert!(clone.get("key").await.expect("get failed").is_some());
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_serializes_same_name() {
    let client = Arc::new(MemoryCacheClient::new(Clock::new_tokio()));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let client = Arc::clone(&client);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            tokio::spawn(async move {
                client
                    .lock("lock_orders", async {
                        let now = active.fetch_add(1, Ordering::AcqRel) + 1;
                        max_active.fetch_max(now, Ordering::AcqRel);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::AcqRel);
                    })
                    .await
                    .expect("lock failed");
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("task panicked");
    }

    assert_eq!(max_active.load(Ordering::Acquire), 1);
}

#[tokio::test]
async fn lock_returns_body_output() {
    let client = MemoryCacheClient::new(Clock::new_tokio());
    let output = client.lock("name", async { 7 }).await.expect("lock failed");
    assert_eq!(output, 7);
}

#[tokio::test]
async fn lock_timeout_fails_closed() {
    let client = MemoryCacheClient::builder(Clock::new_tokio())
        .lock_timeout(Duration::from_millis(20))
        .build();

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .lock("name", async move {
                    held_tx.send(()).expect("test receiver dropped");
                    release_rx.await.expect("release sender dropped");
                })
                .await
                .expect("holder failed to lock");
        })
    };
    held_rx.await.expect("holder never took the lock");

    let ran = AtomicUsize::new(0);
    let error = client
        .lock("name", async {
            ran.fetch_add(1, Ordering::AcqRel);
        })
        .await
        .expect_err("second lock should time out");

    assert_eq!(error.kind(), ErrorKind::LockUnavailable);
    assert_eq!(ran.load(Ordering::Acquire), 0);

    release_tx.send(()).expect("holder dropped");
    holder.await.expect("holder panicked");
}

#[tokio::test]
async fn cancelled_holder_releases_lock() {
    let client = MemoryCacheClient::builder(Clock::new_tokio())
        .lock_timeout(Duration::from_secs(5))
        .build();

    let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .lock("name", async move {
                    held_tx.send(()).expect("test receiver dropped");
                    std::future::pending::<()>().await;
                })
                .await
        })
    };
    held_rx.await.expect("holder never took the lock");

    holder.abort();
    assert!(holder.await.is_err());

    let output = client.lock("name", async { "acquired" }).await.expect("lock failed");
    assert_eq!(output, "acquired");
}
