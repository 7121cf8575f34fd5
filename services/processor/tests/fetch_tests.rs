//! Mirror fallback behaviour of the source fetcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{Reply, ScriptedTransport};
use processor::{ModelConfig, SourceFetcher};
use test_utils::MODEL_CONFIG_YAML;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wx_common::{RunKey, StepKey};

fn three_mirror_model() -> Arc<ModelConfig> {
    let mut model: ModelConfig = serde_yaml::from_str(MODEL_CONFIG_YAML).unwrap();
    model
        .source
        .mirrors
        .push("https://mirror-c.example/hrrr/{date}/{hour}/{filename}".to_string());
    Arc::new(model)
}

fn step() -> StepKey {
    RunKey::parse("hrrr", "2025121012").unwrap().step(3)
}

fn fetcher(transport: Arc<ScriptedTransport>) -> SourceFetcher {
    SourceFetcher::new(transport, three_mirror_model())
        .with_attempt_timeout(Duration::from_millis(200))
}

#[tokio::test]
async fn test_falls_back_through_failed_mirrors() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(vec![
        ("mirror-a", Reply::Fail("503 Service Unavailable")),
        ("mirror-b", Reply::Hang),
        ("mirror-c", Reply::Serve(Bytes::from_static(b"GRIB....7777"))),
    ]));

    let fetched = assert_ok!(
        fetcher(transport.clone())
            .fetch(&step(), "pressure", dir.path(), &CancellationToken::new())
            .await
    );

    assert_eq!(fetched.path, dir.path().join("hrrr.t12z.wrfprsf03.grib2"));
    assert_eq!(std::fs::read(&fetched.path).unwrap(), b"GRIB....7777");
    assert_eq!(fetched.failures.len(), 2);
    assert!(fetched.failures[0].url.contains("mirror-a"));
    assert!(fetched.failures[0].error.contains("503"));
    assert!(fetched.failures[1].url.contains("mirror-b"));
    assert!(fetched.failures[1].error.contains("timed out"));
    assert_eq!(transport.downloads().len(), 3);
    assert!(!dir.path().join("hrrr.t12z.wrfprsf03.grib2.partial").exists());
}

#[tokio::test]
async fn test_existing_file_skips_network() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hrrr.t12z.wrfsfcf03.grib2"), b"GRIB").unwrap();
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));

    let fetched = fetcher(transport.clone())
        .fetch(&step(), "surface", dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(fetched.failures.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_empty_body_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(vec![
        ("mirror-a", Reply::Empty),
        ("mirror-b", Reply::Serve(Bytes::from_static(b"GRIB"))),
    ]));

    let fetched = fetcher(transport)
        .fetch(&step(), "pressure", dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fetched.failures.len(), 1);
    assert_eq!(fetched.failures[0].error, "empty response body");
}

#[tokio::test]
async fn test_all_mirrors_fail() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));

    let failure = assert_err!(
        fetcher(transport.clone())
            .fetch(&step(), "pressure", dir.path(), &CancellationToken::new())
            .await
    );

    assert_eq!(failure.filename, "hrrr.t12z.wrfprsf03.grib2");
    assert_eq!(failure.attempts.len(), 3);
    assert_eq!(transport.downloads().len(), 3);
    assert!(!dir.path().join("hrrr.t12z.wrfprsf03.grib2").exists());
}

#[tokio::test]
async fn test_cancelled_fetch_tries_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(vec![(
        "mirror-a",
        Reply::Serve(Bytes::from_static(b"GRIB")),
    )]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = fetcher(transport.clone())
        .fetch(&step(), "pressure", dir.path(), &cancel)
        .await
        .unwrap_err();

    assert!(failure.attempts.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_unknown_category_fails_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));

    let failure = fetcher(transport.clone())
        .fetch(&step(), "native", dir.path(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(failure.attempts[0].error.contains("unknown file category"));
    assert_eq!(transport.calls(), 0);
}
