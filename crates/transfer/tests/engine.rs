mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use sealdrive_protocol::Direction;
use sealdrive_transfer::{
    ChunkPlan, DownloadOptions, FailureKind, TransferConfig, TransferError, TransferRegistry,
    drive,
};
use tokio::sync::mpsc;

fn small_chunks() -> TransferConfig {
    TransferConfig {
        chunk_size: 1024,
        ..test_config()
    }
}

#[tokio::test]
async fn registry_reports_failure_once_and_drops_entry() {
    let plan = ChunkPlan::new(3 * 1024, 1024);
    let codec = Arc::new(ScriptedCodec::new(plan).fail_at(1));
    let mut h = Harness::scripted(small_chunks(), MockEnv::with_free(u64::MAX), codec);

    let registry = Arc::new(Mutex::new(TransferRegistry::new()));
    let (notice_tx, mut notice_rx) = mpsc::channel(8);
    let events = std::mem::replace(&mut h.events, mpsc::channel(1).1);
    tokio::spawn(drive(Arc::clone(&registry), events, notice_tx));

    let item = remote_item("u-broken", "a.bin", &plan);
    h.engine
        .download(&item, DownloadOptions::default())
        .await
        .unwrap_err();

    let notice = tokio::time::timeout(Duration::from_secs(5), notice_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.id, "u-broken");
    assert_eq!(notice.direction, Direction::Download);
    assert_eq!(notice.kind, FailureKind::Transient);
    assert!(registry.lock().unwrap().is_empty());
    assert!(notice_rx.try_recv().is_err());
}

#[tokio::test]
async fn registry_ignores_stops() {
    let plan = ChunkPlan::new(2 * 1024, 1024);
    let codec = Arc::new(ScriptedCodec::new(plan));
    let mut h = Harness::scripted(small_chunks(), MockEnv::with_free(u64::MAX), codec);

    let registry = Arc::new(Mutex::new(TransferRegistry::new()));
    let (notice_tx, mut notice_rx) = mpsc::channel(8);
    let events = std::mem::replace(&mut h.events, mpsc::channel(1).1);
    tokio::spawn(drive(Arc::clone(&registry), events, notice_tx));

    h.engine.reserve("u-cancelled");
    h.engine.stop("u-cancelled");
    let item = remote_item("u-cancelled", "a.bin", &plan);
    assert!(
        h.engine
            .download(&item, DownloadOptions::default())
            .await
            .unwrap_err()
            .is_stopped()
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notice_rx.try_recv().is_err());
    assert_eq!(registry.lock().unwrap().in_flight(Direction::Download), 0);
}

#[tokio::test]
async fn transfer_slots_limit_whole_files_and_shutdown_rejects_waiters() {
    let config = TransferConfig {
        max_transfers: 1,
        ..small_chunks()
    };
    let plan = ChunkPlan::new(2 * 1024, 1024);
    let codec = Arc::new(ScriptedCodec::new(plan));
    let h = Harness::scripted(config, MockEnv::with_free(u64::MAX), codec.clone());

    h.engine.reserve("u-first");
    h.engine.pause("u-first");
    let first = {
        let downloads = h.engine.downloads();
        let item = remote_item("u-first", "a.bin", &plan);
        tokio::spawn(async move { downloads.queue(&item, DownloadOptions::default()).await })
    };
    while !h.engine.active_ids().iter().any(|id| id == "u-first") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = {
        let downloads = h.engine.downloads();
        let item = remote_item("u-second", "b.bin", &plan);
        tokio::spawn(async move { downloads.queue(&item, DownloadOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());
    assert_eq!(codec.fetch_count(), 0);

    assert_eq!(h.engine.shutdown(), 1);

    assert!(first.await.unwrap().unwrap_err().is_stopped());
    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::Purged | TransferError::Stopped));
    assert!(h.engine.active_ids().is_empty());
}
