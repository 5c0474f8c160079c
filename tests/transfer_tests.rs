//! File and artifact transfer over the cache HTTP surface.


use std::fs;

use tempfile::TempDir;

use buildmesh::api::WorkerId;
use buildmesh::cache::http::{download_artifact, FileClient};
use buildmesh::cache::{ArtifactCache, FileCache};
use buildmesh::id::Id;

use test_harness::*;

#[tokio::test]
async fn test_file_upload_then_download() {
    let coord = start_coordinator().await;

    let source_dir = TempDir::new().unwrap();
    let content = b"module contents\n";
    let local = source_dir.path().join("module.c");
    fs::write(&local, content).unwrap();
    let id = Id::hash(content);

    let client = FileClient::new(&coord.endpoint);
    client.upload(&id, &local).await.unwrap();
    assert!(coord.files.contains(&id));

    // Fetch it back into a separate local cache.
    let downstream_root = TempDir::new().unwrap();
    let downstream = FileCache::new(downstream_root.path().join("files")).unwrap();
    client.download(&downstream, &id).await.unwrap();

    let handle = downstream.get(&id).unwrap();
    assert_eq!(fs::read(handle.path()).unwrap(), content);
}

#[tokio::test]
async fn test_upload_is_idempotent() {
    let coord = start_coordinator().await;

    let source_dir = TempDir::new().unwrap();
    let content = b"same bytes";
    let local = source_dir.path().join("same.txt");
    fs::write(&local, content).unwrap();
    let id = Id::hash(content);

    let client = FileClient::new(&coord.endpoint);
    client.upload(&id, &local).await.unwrap();
    client.upload(&id, &local).await.unwrap();

    let handle = coord.files.get(&id).unwrap();
    assert_eq!(fs::read(handle.path()).unwrap(), content);
}

#[tokio::test]
async fn test_concurrent_uploads_single_write() {
    let coord = start_coordinator().await;

    let source_dir = TempDir::new().unwrap();
    let content = b"raced bytes";
    let local = source_dir.path().join("raced.txt");
    fs::write(&local, content).unwrap();
    let id = Id::hash(content);

    let mut uploads = Vec::new();
    for _ in 0..8 {
        let endpoint = coord.endpoint.clone();
        let local = local.clone();
        uploads.push(tokio::spawn(async move {
            FileClient::new(&endpoint).upload(&id, &local).await
        }));
    }
    for upload in uploads {
        upload.await.unwrap().unwrap();
    }

    let handle = coord.files.get(&id).unwrap();
    assert_eq!(fs::read(handle.path()).unwrap(), content);
    // Losers short-circuit on the committed entry instead of staging a
    // second copy.
    let staging = coord.cache_dir.path().join("files").join("staging");
    assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_missing_file_fails() {
    let coord = start_coordinator().await;

    let downstream_root = TempDir::new().unwrap();
    let downstream = FileCache::new(downstream_root.path().join("files")).unwrap();

    let absent = Id::hash(b"nowhere");
    let client = FileClient::new(&coord.endpoint);
    assert!(client.download(&downstream, &absent).await.is_err());
}

#[tokio::test]
async fn test_artifact_download_between_workers() {
    let coord = start_coordinator().await;
    let owner = start_worker(&coord.endpoint).await;

    // Seed an artifact directly into the owning worker's cache.
    let id = Id::hash(b"built-artifact");
    let writer = owner.artifacts.create(&id).unwrap();
    fs::write(writer.path().join("lib.a"), b"archive").unwrap();
    fs::create_dir_all(writer.path().join("include")).unwrap();
    fs::write(writer.path().join("include/lib.h"), b"header").unwrap();
    writer.commit().unwrap();

    let local_root = TempDir::new().unwrap();
    let local = ArtifactCache::new(local_root.path().join("artifacts")).unwrap();
    download_artifact(&local, &WorkerId::new(&owner.endpoint), &id)
        .await
        .unwrap();

    let handle = local.get(&id).unwrap();
    assert_eq!(fs::read(handle.path().join("lib.a")).unwrap(), b"archive");
    assert_eq!(
        fs::read(handle.path().join("include/lib.h")).unwrap(),
        b"header"
    );
}

#[tokio::test]
async fn test_artifact_download_missing_fails() {
    let coord = start_coordinator().await;
    let owner = start_worker(&coord.endpoint).await;

    let local_root = TempDir::new().unwrap();
    let local = ArtifactCache::new(local_root.path().join("artifacts")).unwrap();
    let absent = Id::hash(b"never-built");
    assert!(
        download_artifact(&local, &WorkerId::new(&owner.endpoint), &absent)
            .await
            .is_err()
    );
}
