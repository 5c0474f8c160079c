use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use buildmesh::cache::{ArtifactCache, FileCache};
use buildmesh::error::Error;
use buildmesh::id::Id;

fn file_cache() -> (FileCache, TempDir) {
    let root = TempDir::new().unwrap();
    let cache = FileCache::new(root.path().join("files")).unwrap();
    (cache, root)
}

fn artifact_cache() -> (ArtifactCache, TempDir) {
    let root = TempDir::new().unwrap();
    let cache = ArtifactCache::new(root.path().join("artifacts")).unwrap();
    (cache, root)
}

#[test]
fn test_write_commit_get() {
    let (cache, _root) = file_cache();
    let id = Id::hash(b"contents");

    let mut writer = cache.write(&id).unwrap();
    writer.write_all(b"contents").unwrap();
    writer.commit().unwrap();

    let handle = cache.get(&id).unwrap();
    assert_eq!(fs::read(handle.path()).unwrap(), b"contents");
}

#[test]
fn test_get_missing_returns_not_found() {
    let (cache, _root) = file_cache();
    let err = cache.get(&Id::hash(b"absent")).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_duplicate_writer_rejected() {
    let (cache, _root) = file_cache();
    let id = Id::hash(b"data");

    // Second writer while the first is still open.
    let writer = cache.write(&id).unwrap();
    assert!(matches!(cache.write(&id), Err(Error::Exists(_))));
    writer.commit().unwrap();

    // And after the entry is committed.
    assert!(matches!(cache.write(&id), Err(Error::Exists(_))));
}

#[test]
fn test_writing_entry_invisible_to_get() {
    let (cache, _root) = file_cache();
    let id = Id::hash(b"partial");

    let mut writer = cache.write(&id).unwrap();
    writer.write_all(b"part").unwrap();
    assert!(cache.get(&id).is_err());

    writer.commit().unwrap();
    assert!(cache.get(&id).is_ok());
}

#[test]
fn test_abort_discards_entry() {
    let (cache, _root) = file_cache();
    let id = Id::hash(b"aborted");

    let mut writer = cache.write(&id).unwrap();
    writer.write_all(b"junk").unwrap();
    writer.abort().unwrap();

    assert!(cache.get(&id).is_err());
    // The slot is free again.
    let mut writer = cache.write(&id).unwrap();
    writer.write_all(b"good").unwrap();
    writer.commit().unwrap();
    assert_eq!(fs::read(cache.get(&id).unwrap().path()).unwrap(), b"good");
}

#[test]
fn test_drop_without_commit_aborts() {
    let (cache, _root) = file_cache();
    let id = Id::hash(b"dropped");

    {
        let mut writer = cache.write(&id).unwrap();
        writer.write_all(b"junk").unwrap();
    }

    assert!(cache.get(&id).is_err());
    assert!(cache.write(&id).is_ok());
}

#[test]
fn test_remove_blocks_while_pinned() {
    let (cache, _root) = file_cache();
    let cache = Arc::new(cache);
    let id = Id::hash(b"pinned");

    let mut writer = cache.write(&id).unwrap();
    writer.write_all(b"pinned").unwrap();
    writer.commit().unwrap();

    let handle = cache.get(&id).unwrap();

    let removed = Arc::new(AtomicBool::new(false));
    let remover = {
        let cache = cache.clone();
        let removed = removed.clone();
        std::thread::spawn(move || {
            cache.remove(&id).unwrap();
            removed.store(true, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(!removed.load(Ordering::SeqCst), "remove must wait for pins");

    drop(handle);
    remover.join().unwrap();
    assert!(removed.load(Ordering::SeqCst));
    assert!(cache.get(&id).is_err());
}

#[test]
fn test_concurrent_writers_single_winner() {
    let (cache, _root) = file_cache();
    let cache = Arc::new(cache);
    let id = Id::hash(b"contended");

    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let wins = wins.clone();
        handles.push(std::thread::spawn(move || {
            if let Ok(mut writer) = cache.write(&id) {
                wins.fetch_add(1, Ordering::SeqCst);
                writer.write_all(b"winner").unwrap();
                writer.commit().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read(cache.get(&id).unwrap().path()).unwrap(), b"winner");
}

#[test]
fn test_reopen_reindexes_committed_and_sweeps_staging() {
    let root = TempDir::new().unwrap();
    let cache_root = root.path().join("files");
    let id = Id::hash(b"persisted");
    let stale = Id::hash(b"stale");

    {
        let cache = FileCache::new(&cache_root).unwrap();
        let mut writer = cache.write(&id).unwrap();
        writer.write_all(b"persisted").unwrap();
        writer.commit().unwrap();

        // Leak an in-flight write to simulate a crashed process.
        let mut writer = cache.write(&stale).unwrap();
        writer.write_all(b"partial").unwrap();
        std::mem::forget(writer);
    }

    let cache = FileCache::new(&cache_root).unwrap();
    assert_eq!(
        fs::read(cache.get(&id).unwrap().path()).unwrap(),
        b"persisted"
    );
    assert!(cache.get(&stale).is_err());
    // The staging slot was swept, so the entry can be written again.
    assert!(cache.write(&stale).is_ok());
}

#[test]
fn test_artifact_create_commit_get() {
    let (cache, _root) = artifact_cache();
    let id = Id::hash(b"tree");

    let writer = cache.create(&id).unwrap();
    fs::write(writer.path().join("out.txt"), b"result").unwrap();
    fs::create_dir_all(writer.path().join("sub")).unwrap();
    fs::write(writer.path().join("sub/nested.txt"), b"nested").unwrap();
    writer.commit().unwrap();

    let handle = cache.get(&id).unwrap();
    assert_eq!(fs::read(handle.path().join("out.txt")).unwrap(), b"result");
    assert_eq!(
        fs::read(handle.path().join("sub/nested.txt")).unwrap(),
        b"nested"
    );
}

#[test]
fn test_artifact_abort_discards_tree() {
    let (cache, _root) = artifact_cache();
    let id = Id::hash(b"discarded");

    let writer = cache.create(&id).unwrap();
    fs::write(writer.path().join("out.txt"), b"junk").unwrap();
    writer.abort().unwrap();

    assert!(cache.get(&id).is_err());
    assert!(cache.create(&id).is_ok());
}

#[test]
fn test_artifact_duplicate_create_rejected() {
    let (cache, _root) = artifact_cache();
    let id = Id::hash(b"once");

    let writer = cache.create(&id).unwrap();
    assert!(matches!(cache.create(&id), Err(Error::Exists(_))));
    writer.commit().unwrap();
    assert!(matches!(cache.create(&id), Err(Error::Exists(_))));
}
