//! Full update cycles against the release server.
//!
//! ## Test Coverage
//!
//! - Up-to-date check
//! - Fresh download, verification and commit
//! - Reuse of a previously verified artifact
//! - Re-download of a corrupted stored artifact
//! - Size-floor and digest rejections
//! - Unusable digests rejected before download
//! - API envelope transport and YAML documents
//! - Timer keeps running after a failed check

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{
    artifact_bytes, drain, names, sha256_hex, wait_for, TestHarness, RUNNING_VERSION,
};
use md5::{Digest, Md5};
use semver::Version;
use std::time::Duration;
use tiny_updater::update::ManifestFormat;
use tiny_updater::{CycleOutcome, ErrorKind, ManifestSource, Phase, UpdateEvent};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

/// Test 1: Manifest at the running version ends the cycle early
#[tokio::test]
async fn test_up_to_date() {
    let harness = TestHarness::setup().await;
    harness
        .serve_release(&RUNNING_VERSION.to_string(), "/app.exe", None)
        .await;
    harness.serve_artifact("/app.exe", artifact_bytes(64), 0).await;

    let updater = harness.updater(harness.config());
    let mut events = updater.subscribe();

    let report = updater.check_now().await.unwrap();
    assert_eq!(report.phases, vec![Phase::Checking, Phase::UpToDate]);
    assert_eq!(
        report.outcome,
        CycleOutcome::UpToDate {
            latest: RUNNING_VERSION
        }
    );
    assert_eq!(
        drain(&mut events),
        vec![UpdateEvent::ActualVersion {
            latest: RUNNING_VERSION
        }]
    );
    assert!(updater.store().versions().unwrap().is_empty());
}

/// Test 2: Newer release is downloaded, verified and committed
#[tokio::test]
async fn test_fresh_download() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(200 * 1024);
    harness
        .serve_release("3.0.0", "/app-3.0.0.exe", Some(&sha256_hex(&body)))
        .await;
    harness
        .serve_artifact("/app-3.0.0.exe", body.clone(), 1)
        .await;

    let updater = harness.updater(harness.config());
    let mut events = updater.subscribe();

    let report = updater.check_now().await.unwrap();
    assert_eq!(
        report.phases,
        vec![
            Phase::Checking,
            Phase::UpdateAvailable,
            Phase::Downloading,
            Phase::Verifying,
            Phase::Ready,
        ]
    );

    let version = Version::new(3, 0, 0);
    let artifact = report.artifact().unwrap();
    assert_eq!(artifact.version, version);
    assert!(artifact.verified);
    assert_eq!(artifact.size_bytes, body.len() as u64);
    assert_eq!(artifact.path, updater.store().path_for(&version));
    assert_eq!(std::fs::read(&artifact.path).unwrap(), body);
    assert!(!updater.store().staging_path_for(&version).exists());
    assert_eq!(updater.phase(), Phase::Ready);

    let events = drain(&mut events);
    let seen = names(&events);
    assert!(seen.len() >= 4, "expected progress events, got {seen:?}");
    assert_eq!(seen[0], "updates-available");
    assert_eq!(seen[1], "downloading-updates");
    assert_eq!(seen[seen.len() - 1], "updates-downloaded");
    assert!(seen[2..seen.len() - 1]
        .iter()
        .all(|name| *name == "download-progress"));

    let progress: Vec<(Option<u64>, u64)> = events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::DownloadProgress { total, downloaded } => Some((*total, *downloaded)),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(
        progress.last(),
        Some(&(Some(body.len() as u64), body.len() as u64))
    );

    match events.last().unwrap() {
        UpdateEvent::UpdatesDownloaded { version: v, path } => {
            assert_eq!(*v, version);
            assert_eq!(*path, artifact.path);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// Test 3: A stored artifact that verifies is reused without a request
#[tokio::test]
async fn test_verified_artifact_is_reused() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(4096);
    harness
        .serve_release("2.0.0", "/app-2.0.0.exe", Some(&sha256_hex(&body)))
        .await;
    harness.serve_artifact("/app-2.0.0.exe", body.clone(), 0).await;

    let updater = harness.updater(harness.config());
    let version = Version::new(2, 0, 0);
    updater.store().ensure_dir(&version).unwrap();
    std::fs::write(updater.store().path_for(&version), &body).unwrap();
    let mut events = updater.subscribe();

    let report = updater.check_now().await.unwrap();
    assert_eq!(
        report.phases,
        vec![
            Phase::Checking,
            Phase::UpdateAvailable,
            Phase::AlreadyVerified
        ]
    );
    assert_eq!(report.artifact().unwrap().size_bytes, 4096);
    assert_eq!(
        names(&drain(&mut events)),
        vec!["updates-available", "updates-downloaded"]
    );
}

/// Test 4: A stored artifact that fails verification is fetched again
#[tokio::test]
async fn test_corrupted_artifact_is_replaced() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(4096);
    harness
        .serve_release("2.0.0", "/app-2.0.0.exe", Some(&sha256_hex(&body)))
        .await;
    harness.serve_artifact("/app-2.0.0.exe", body.clone(), 1).await;

    let updater = harness.updater(harness.config());
    let version = Version::new(2, 0, 0);
    updater.store().ensure_dir(&version).unwrap();
    std::fs::write(updater.store().path_for(&version), b"corrupted").unwrap();

    let report = updater.check_now().await.unwrap();
    assert!(report.phases.contains(&Phase::Downloading));
    assert_eq!(report.phases.last(), Some(&Phase::Ready));
    assert_eq!(
        std::fs::read(updater.store().path_for(&version)).unwrap(),
        body
    );
}

/// Test 5: An artifact at or below the size floor is rejected as too small
#[tokio::test]
async fn test_size_floor_rejects_artifact() {
    let harness = TestHarness::setup().await;
    harness.serve_release("2.0.0", "/app-2.0.0.exe", None).await;
    harness
        .serve_artifact("/app-2.0.0.exe", artifact_bytes(512), 1)
        .await;

    let mut config = harness.config();
    config.min_size_bytes = 1024;
    let updater = harness.updater(config);
    let mut events = updater.subscribe();

    let report = updater.check_now().await.unwrap();
    assert_eq!(report.phases.last(), Some(&Phase::Failed));
    match &report.outcome {
        CycleOutcome::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Integrity);
            assert!(message.contains("too small"), "{message}");
            assert!(!message.contains("hash mismatch"), "{message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let version = Version::new(2, 0, 0);
    assert!(!updater.store().exists(&version));
    assert!(updater.store().staging_path_for(&version).is_file());

    let last = drain(&mut events).pop().unwrap();
    assert!(matches!(
        last,
        UpdateEvent::Error {
            kind: ErrorKind::Integrity,
            ..
        }
    ));
}

/// Test 6: A digest mismatch is rejected and never committed
#[tokio::test]
async fn test_hash_mismatch_rejects_artifact() {
    let harness = TestHarness::setup().await;
    let wrong = sha256_hex(b"some other build");
    harness
        .serve_release("2.0.0", "/app-2.0.0.exe", Some(&wrong))
        .await;
    harness
        .serve_artifact("/app-2.0.0.exe", artifact_bytes(2048), 1)
        .await;

    let updater = harness.updater(harness.config());
    let report = updater.check_now().await.unwrap();

    match &report.outcome {
        CycleOutcome::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Integrity);
            assert!(message.contains("hash mismatch"), "{message}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        report.phases,
        vec![
            Phase::Checking,
            Phase::UpdateAvailable,
            Phase::Downloading,
            Phase::Verifying,
            Phase::Failed,
        ]
    );
    assert!(!updater.store().exists(&Version::new(2, 0, 0)));
}

/// Test 7: API transport with an MD5 application hash
#[tokio::test]
async fn test_api_envelope_cycle() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(8192);
    let digest = hex::encode(Md5::digest(&body));

    let mut config = harness.config_for(ManifestSource::api(harness.url("/api/check")));
    config.user_agent = Some("MyApp/1.0.2".to_string());

    Mock::given(method("POST"))
        .and(path("/api/check"))
        .and(header("user-agent", "MyApp/1.0.2"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "application_data": {
                "version": "2.1.0",
                "download_link": harness.url("/setup-2.1.0.exe"),
                "application_hash": digest,
            }
        })))
        .expect(1)
        .mount(harness.server())
        .await;
    harness.serve_artifact("/setup-2.1.0.exe", body, 1).await;

    let updater = harness.updater(config);
    let report = updater.check_now().await.unwrap();

    let artifact = report.artifact().unwrap();
    assert_eq!(artifact.version, Version::new(2, 1, 0));
    assert!(artifact.path.ends_with("2.1.0/installer.exe"));
}

/// Test 8: YAML document is parsed and cached beside the artifacts
#[tokio::test]
async fn test_yaml_document_is_cached() {
    let harness = TestHarness::setup().await;
    let body = artifact_bytes(1024);
    harness
        .serve_manifest(
            "/latest.yml",
            format!(
                "version: 2.0.0\nhash: sha256:{}\nfiles:\n  - url: app-2.0.0.exe\n",
                sha256_hex(&body)
            ),
        )
        .await;
    harness.serve_artifact("/app-2.0.0.exe", body, 1).await;

    let updater =
        harness.updater(harness.config_for(ManifestSource::document(harness.url("/latest.yml"))));
    let report = updater.check_now().await.unwrap();

    assert!(report.artifact().is_some());
    let cached = updater.store().manifest_cache_path(ManifestFormat::Yaml);
    assert!(std::fs::read_to_string(cached)
        .unwrap()
        .starts_with("version: 2.0.0"));
}

/// Test 9: No artifact for the platform fails the cycle
#[tokio::test]
async fn test_no_matching_artifact() {
    let harness = TestHarness::setup().await;
    harness.serve_release("2.0.0", "/app-2.0.0.deb", None).await;
    harness
        .serve_artifact("/app-2.0.0.deb", artifact_bytes(64), 0)
        .await;

    let updater = harness.updater(harness.config());
    let report = updater.check_now().await.unwrap();

    assert_eq!(
        report.phases,
        vec![Phase::Checking, Phase::UpdateAvailable, Phase::Failed]
    );
    assert!(matches!(
        report.outcome,
        CycleOutcome::Failed {
            kind: ErrorKind::NoMatchingArtifact,
            ..
        }
    ));
}

/// Test 10: A failed scheduled check does not stop later checks
#[tokio::test]
async fn test_timer_survives_manifest_failure() {
    let harness = TestHarness::setup().await;
    Mock::given(method("GET"))
        .and(path("/latest.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(harness.server())
        .await;
    harness
        .serve_release(&RUNNING_VERSION.to_string(), "/app.exe", None)
        .await;

    let mut config = harness.config();
    config.check_interval_ms = 100;
    let updater = harness.updater(config);
    let mut events = updater.subscribe();

    let handle = updater.start().unwrap();

    let first = wait_for(&mut events, Duration::from_secs(5), |_| true).await;
    assert!(matches!(
        first,
        UpdateEvent::Error {
            kind: ErrorKind::Network,
            ..
        }
    ));
    wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, UpdateEvent::ActualVersion { .. })
    })
    .await;

    updater.shutdown();
    handle.await.unwrap();
}

/// Test 11: An unusable digest fails every check before any transfer
#[tokio::test]
async fn test_unrecognized_hash_never_downloads() {
    let harness = TestHarness::setup().await;
    harness
        .serve_release("2.0.0", "/app-2.0.0.exe", Some("abc123"))
        .await;
    harness
        .serve_artifact("/app-2.0.0.exe", artifact_bytes(2048), 0)
        .await;

    let updater = harness.updater(harness.config());
    for _ in 0..2 {
        let report = updater.check_now().await.unwrap();
        assert_eq!(report.phases, vec![Phase::Checking, Phase::Failed]);
        match &report.outcome {
            CycleOutcome::Failed { kind, message } => {
                assert_eq!(*kind, ErrorKind::Schema);
                assert!(message.contains("abc123"), "{message}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert!(!updater.store().exists(&Version::new(2, 0, 0)));
    harness.server().verify().await;
}
