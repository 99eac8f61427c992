//! Transfers that break off, get cancelled, or race with other triggers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{artifact_bytes, sha256_hex, wait_for, TestHarness, TruncatedServer};
use semver::Version;
use std::time::Duration;
use tiny_updater::{CycleOutcome, ErrorKind, Phase, UpdateEvent};

fn assert_download_failure(outcome: &CycleOutcome, needle: &str) {
    match outcome {
        CycleOutcome::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Download);
            assert!(message.contains(needle), "{message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

/// Test 1: A body shorter than announced leaves nothing on disk
#[tokio::test]
async fn test_truncated_transfer_leaves_no_file() {
    let harness = TestHarness::setup().await;
    let origin = TruncatedServer::start(100_000, 1_000, false).await;
    harness
        .serve_manifest(
            "/latest.json",
            serde_json::json!({ "version": "2.0.0", "files": [{ "url": origin.url() }] })
                .to_string(),
        )
        .await;

    let updater = harness.updater(harness.config());
    let report = updater.check_now().await.unwrap();

    assert_eq!(
        report.phases,
        vec![
            Phase::Checking,
            Phase::UpdateAvailable,
            Phase::Downloading,
            Phase::Failed
        ]
    );
    assert!(matches!(
        report.outcome,
        CycleOutcome::Failed {
            kind: ErrorKind::Download,
            ..
        }
    ));

    let version = Version::new(2, 0, 0);
    assert!(!updater.store().path_for(&version).exists());
    assert!(!updater.store().staging_path_for(&version).exists());
}

/// Test 2: Cancelling mid-transfer fails the cycle and removes the partial file
#[tokio::test]
async fn test_cancel_download() {
    let harness = TestHarness::setup().await;
    let origin = TruncatedServer::start(1_000_000, 64 * 1024, true).await;
    harness
        .serve_manifest(
            "/latest.json",
            serde_json::json!({ "version": "2.0.0", "files": [{ "url": origin.url() }] })
                .to_string(),
        )
        .await;

    let updater = harness.updater(harness.config());
    let mut events = updater.subscribe();

    let cycle = tokio::spawn({
        let updater = updater.clone();
        async move { updater.check_now().await }
    });

    wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, UpdateEvent::DownloadProgress { .. })
    })
    .await;
    assert_eq!(updater.phase(), Phase::Downloading);
    assert!(updater.cancel_download());

    let report = tokio::time::timeout(Duration::from_secs(5), cycle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_download_failure(&report.outcome, "cancelled");
    assert!(!updater.is_checking());

    let version = Version::new(2, 0, 0);
    assert!(!updater.store().staging_path_for(&version).exists());
    assert!(!updater.store().path_for(&version).exists());
}

/// Test 3: Triggers during a running cycle are dropped; one download happens
#[tokio::test]
async fn test_concurrent_triggers_download_once() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(32 * 1024);
    harness
        .serve_release("2.0.0", "/app-2.0.0.exe", Some(&sha256_hex(&body)))
        .await;
    harness
        .serve_artifact_delayed("/app-2.0.0.exe", body, 1, Duration::from_millis(300))
        .await;

    let updater = harness.updater(harness.config());

    let (a, b, c) = tokio::join!(
        updater.check_now(),
        updater.check_now(),
        updater.check_now()
    );
    let completed: Vec<_> = [a, b, c].into_iter().flatten().collect();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].artifact().is_some());

    // The guard is released once the cycle ends.
    let again = updater.check_now().await.unwrap();
    assert_eq!(again.phases.last(), Some(&Phase::AlreadyVerified));
}

/// Test 4: Artifact URLs outside http(s) are refused
#[tokio::test]
async fn test_unsupported_scheme() {
    let harness = TestHarness::setup().await;
    harness
        .serve_manifest(
            "/latest.json",
            r#"{"version":"2.0.0","files":[{"url":"ftp://mirror.example.com/app-2.0.0.exe"}]}"#,
        )
        .await;

    let updater = harness.updater(harness.config());
    let report = updater.check_now().await.unwrap();

    assert_download_failure(&report.outcome, "scheme");
}

/// Test 5: Shutdown cancels a running transfer
#[tokio::test]
async fn test_shutdown_cancels_transfer() {
    let harness = TestHarness::setup().await;
    let origin = TruncatedServer::start(1_000_000, 64 * 1024, true).await;
    harness
        .serve_manifest(
            "/latest.json",
            serde_json::json!({ "version": "2.0.0", "files": [{ "url": origin.url() }] })
                .to_string(),
        )
        .await;

    let updater = harness.updater(harness.config());
    let mut events = updater.subscribe();
    let timer = updater.start().unwrap();

    wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, UpdateEvent::DownloadProgress { .. })
    })
    .await;
    updater.shutdown();

    let failure = wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, UpdateEvent::Error { .. })
    })
    .await;
    assert!(matches!(
        failure,
        UpdateEvent::Error {
            kind: ErrorKind::Download,
            ..
        }
    ));

    tokio::time::timeout(Duration::from_secs(5), timer)
        .await
        .unwrap()
        .unwrap();
    assert!(updater.check_now().await.is_none());
}
