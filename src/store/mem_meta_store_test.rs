use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::StoreError;

async fn recv(rx: &mut mpsc::Receiver<WatchEvent>) -> WatchEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("Timeout waiting for change")
        .expect("Channel closed")
}

async fn recv_change(rx: &mut mpsc::Receiver<WatchEvent>) -> RemoteChange {
    match recv(rx).await {
        WatchEvent::Change(change) => change,
        other => panic!("expected change, got {other:?}"),
    }
}

#[tokio::test]
async fn create_fails_when_path_exists() {
    let store = MemMetaStore::new();

    store.create("/cfg/a", Bytes::from("1")).await.unwrap();
    let err = store.create("/cfg/a", Bytes::from("2")).await.unwrap_err();

    assert_eq!(err, StoreError::AlreadyExists { path: "/cfg/a".to_string() });
    assert_eq!(store.get("/cfg/a").unwrap().0, Bytes::from("1"));
}

#[tokio::test]
async fn conditional_write_requires_current_revision() {
    let store = MemMetaStore::new();
    let rev1 = store.create("/cfg/a", Bytes::from("1")).await.unwrap();

    let rev2 = store
        .conditional_write("/cfg/a", Bytes::from("2"), &rev1)
        .await
        .unwrap();
    assert_ne!(rev1, rev2);

    let err = store
        .conditional_write("/cfg/a", Bytes::from("3"), &rev1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RevisionMismatch { .. }));
    assert_eq!(store.get("/cfg/a").unwrap(), (Bytes::from("2"), rev2));
}

#[tokio::test]
async fn conditional_write_on_missing_path_fails_not_found() {
    let store = MemMetaStore::new();
    let rev = store.put("/cfg/a", "1");
    store.remove("/cfg/a");

    let err = store
        .conditional_write("/cfg/a", Bytes::from("2"), &rev)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(err.is_conflict());
}

#[tokio::test]
async fn conditional_delete_honours_revision() {
    let store = MemMetaStore::new();
    let rev1 = store.create("/cfg/a", Bytes::from("1")).await.unwrap();
    let rev2 = store.put("/cfg/a", "2");

    let err = store.conditional_delete("/cfg/a", Some(rev1)).await.unwrap_err();
    assert!(matches!(err, StoreError::RevisionMismatch { .. }));

    store.conditional_delete("/cfg/a", Some(rev2)).await.unwrap();
    assert!(store.get("/cfg/a").is_none());
}

#[tokio::test]
async fn unconditional_delete_of_missing_path_is_ok() {
    let store = MemMetaStore::new();

    store.conditional_delete("/cfg/none", None).await.unwrap();

    store.put("/cfg/a", "1");
    store.conditional_delete("/cfg/a", None).await.unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn enumerate_children_respects_prefix() {
    let store = MemMetaStore::new();
    store.put("/cfg/a", "1");
    store.put("/cfg/b", "2");
    store.put("/other/c", "3");

    let listing = store.enumerate_children("/cfg/").await.unwrap();

    let paths: Vec<_> = listing.children.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["/cfg/a", "/cfg/b"]);
    assert!(listing.children.iter().all(|c| c.value.is_some()));
    // Listing revision covers the unrelated write too
    assert_eq!(decode_revision(&listing.revision), Some(3));
}

#[tokio::test]
async fn recursive_delete_only_touches_prefix() {
    let store = MemMetaStore::new();
    store.put("/cfg/a", "1");
    store.put("/cfg/b", "2");
    store.put("/other/c", "3");

    let wiped_at = store.recursive_delete("/cfg/").await.unwrap();

    assert_eq!(decode_revision(&wiped_at), Some(5));
    assert_eq!(store.len(), 1);
    assert!(store.get("/other/c").is_some());
}

#[tokio::test]
async fn revisions_round_trip_through_opaque_token() {
    let rev = encode_revision(42);

    assert_eq!(decode_revision(&rev), Some(42));
    assert_eq!(decode_revision(&Revision::new(vec![1, 2, 3])), None);
}

#[tokio::test]
async fn revisions_compare_in_commit_order() {
    let store = MemMetaStore::new();
    let first = store.put("/cfg/a", "1");
    let second = store.put("/cfg/b", "2");
    // 255 < 256 numerically even though the low byte shrinks
    let low = encode_revision(255);
    let high = encode_revision(256);

    assert_eq!(store.compare_revisions(&first, &second), std::cmp::Ordering::Less);
    assert_eq!(store.compare_revisions(&second, &first), std::cmp::Ordering::Greater);
    assert_eq!(store.compare_revisions(&second, &second), std::cmp::Ordering::Equal);
    assert_eq!(store.compare_revisions(&low, &high), std::cmp::Ordering::Less);
}

#[tokio::test]
async fn watch_replays_existing_children_then_streams_changes() {
    let store = Arc::new(MemMetaStore::new());
    store.put("/cfg/existing", "1");
    store.put("/other/x", "1");

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let watcher = {
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { store.watch_children("/cfg/", tx, cancel).await })
    };

    let WatchEvent::Snapshot(snapshot) = recv(&mut rx).await else {
        panic!("watch must open with a snapshot");
    };
    assert_eq!(snapshot.children.len(), 1);
    assert_eq!(snapshot.children[0].path, "/cfg/existing");
    assert_eq!(snapshot.children[0].value, Some(Bytes::from("1")));
    assert_eq!(decode_revision(&snapshot.revision), Some(2));

    store.put("/other/y", "ignored");
    store.put("/cfg/new", "2");
    let live = recv_change(&mut rx).await;
    assert_eq!(live.path, "/cfg/new");

    store.remove("/cfg/new");
    let deleted = recv_change(&mut rx).await;
    assert_eq!(deleted.path, "/cfg/new");
    assert_eq!(deleted.value, None);

    cancel.cancel();
    assert_eq!(watcher.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn disconnect_breaks_active_watch() {
    let store = Arc::new(MemMetaStore::new());
    let (tx, _rx) = mpsc::channel(16);
    let watcher = {
        let store = store.clone();
        tokio::spawn(async move { store.watch_children("/cfg/", tx, CancellationToken::new()).await })
    };

    // Wait for the watch to subscribe
    while store.watcher_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store.disconnect_watchers();

    let result = timeout(Duration::from_secs(1), watcher).await.unwrap().unwrap();
    assert!(matches!(result, Err(StoreError::Transport(_))));
}

#[tokio::test]
async fn lagging_watch_fails_with_transport_error() {
    let store = Arc::new(MemMetaStore::with_capacity(2));
    // Sink of one slot that nobody drains, so the broadcast receiver falls behind
    let (tx, mut rx) = mpsc::channel(1);
    let watcher = {
        let store = store.clone();
        tokio::spawn(async move { store.watch_children("/cfg/", tx, CancellationToken::new()).await })
    };
    while store.watcher_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for i in 0..8 {
        store.put(&format!("/cfg/k{i}"), "v");
    }
    // Drain so the watcher can get back to the broadcast receiver and notice the lag
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let result = timeout(Duration::from_secs(1), watcher).await.unwrap().unwrap();
    assert!(matches!(result, Err(StoreError::Transport(_))));
    drain.abort();
}

#[tokio::test]
async fn watch_reports_closed_sink() {
    let store = Arc::new(MemMetaStore::new());
    store.put("/cfg/a", "1");
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let result = store.watch_children("/cfg/", tx, CancellationToken::new()).await;

    assert_eq!(result, Err(StoreError::Closed));
}
