//! Artifact fetcher against an in-memory object store

mod common;

use common::{iris_bundle_files, pickle, iris_estimator, tar_gz, under, MockObjectStore};
use modelgate_core::{Error, StorageLocation};
use modelgate_loader::{ArtifactFetcher, ScratchSpace};
use std::sync::Arc;
use std::time::Duration;

fn fetcher(store: MockObjectStore) -> (ArtifactFetcher, Arc<MockObjectStore>) {
    let store = Arc::new(store);
    let scratch = Arc::new(ScratchSpace::new(None).unwrap());
    let fetcher = ArtifactFetcher::new(store.clone(), scratch, Duration::from_secs(5));
    (fetcher, store)
}

#[tokio::test]
async fn test_tarball_with_single_directory_becomes_root() {
    let archive = tar_gz(&under("model", iris_bundle_files()));
    let (fetcher, _) = fetcher(MockObjectStore::new().with_object("mlflow", "1/abc/model.tar.gz", archive));

    let location = StorageLocation::parse("artifact:s3:minio:9000:mlflow:1/abc/model.tar.gz").unwrap();
    let artifact = fetcher.fetch(&location, None).await.unwrap();

    let scratch = artifact.scratch().unwrap();
    assert_eq!(artifact.root(), scratch.join("model"));
    assert!(artifact.root().join("MLmodel").is_file());
    assert!(artifact.root().join("model.pkl").is_file());
    assert!(scratch.starts_with(fetcher.scratch().root()));
}

#[tokio::test]
async fn test_flat_tarball_keeps_scratch_root() {
    let archive = tar_gz(&iris_bundle_files());
    let (fetcher, _) = fetcher(MockObjectStore::new().with_object("mlflow", "model.tgz", archive));

    let artifact = fetcher
        .fetch(&StorageLocation::new("mlflow", "model.tgz"), None)
        .await
        .unwrap();

    assert_eq!(Some(artifact.root()), artifact.scratch());
    assert!(artifact.root().join("MLmodel").is_file());
}

#[tokio::test]
async fn test_non_archive_is_kept_as_is() {
    let bytes = pickle(&iris_estimator());
    let (fetcher, _) = fetcher(MockObjectStore::new().with_object("models", "iris/model.pkl", bytes.clone()));

    let artifact = fetcher
        .fetch(&StorageLocation::new("models", "iris/model.pkl"), None)
        .await
        .unwrap();

    let file = artifact.root().join("model.pkl");
    assert_eq!(std::fs::read(file).unwrap(), bytes);
}

#[tokio::test]
async fn test_directory_shaped_artifact_is_downloaded_by_prefix() {
    let store = MockObjectStore::new().with_directory(
        "mlflow",
        "1/abc/artifacts/model",
        iris_bundle_files(),
    );
    let (fetcher, store) = fetcher(store);

    let artifact = fetcher
        .fetch(&StorageLocation::parse("s3://mlflow/1/abc/artifacts/model").unwrap(), None)
        .await
        .unwrap();

    assert!(artifact.root().ends_with("model"));
    assert!(artifact.root().join("MLmodel").is_file());
    assert!(artifact.root().join("requirements.txt").is_file());
    // One miss on the bare key, then one download per file
    assert_eq!(store.download_count(), 4);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (fetcher, _) = fetcher(MockObjectStore::new());

    let err = fetcher
        .fetch(&StorageLocation::new("mlflow", "nothing/here.pkl"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_missing_object_stays_not_found_when_listing_is_denied() {
    let (fetcher, store) = fetcher(MockObjectStore::new().deny_list());

    let err = fetcher
        .fetch(&StorageLocation::new("mlflow", "nothing/here.pkl"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{}", err);
    assert_eq!(store.download_count(), 1);
}

#[tokio::test]
async fn test_each_fetch_gets_a_fresh_scratch_dir() {
    let bytes = pickle(&iris_estimator());
    let (fetcher, _) = fetcher(MockObjectStore::new().with_object("models", "model.pkl", bytes));
    let location = StorageLocation::new("models", "model.pkl");

    let first = fetcher.fetch(&location, None).await.unwrap();
    let second = fetcher.fetch(&location, None).await.unwrap();

    assert_ne!(first.scratch(), second.scratch());
    assert!(first.root().join("model.pkl").is_file());
}

#[tokio::test(start_paused = true)]
async fn test_slow_download_times_out_as_fetch_error() {
    let store = MockObjectStore::new()
        .with_object("models", "model.pkl", b"slow".to_vec())
        .with_latency(Duration::from_secs(60));
    let (fetcher, _) = fetcher(store);

    let err = fetcher
        .fetch(&StorageLocation::new("models", "model.pkl"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fetch(_)));
}
