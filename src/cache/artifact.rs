use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::state::EntryMap;
use crate::error::{Error, Result};
use crate::id::Id;

const STAGING_DIR: &str = "staging";

/// Content-addressed store of artifact directory trees, keyed by the
/// producing job's ID. Jobs write their output into the staging directory
/// handed out by [`ArtifactCache::create`]; commit renames the whole tree
/// into place.
pub struct ArtifactCache {
    root: PathBuf,
    staging: PathBuf,
    state: Arc<EntryMap>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let state = Arc::new(EntryMap::default());
        let mut indexed = 0usize;
        for dir_entry in fs::read_dir(&root)? {
            let dir_entry = dir_entry?;
            if let Ok(id) = dir_entry.file_name().to_string_lossy().parse::<Id>() {
                state.index_committed(id);
                indexed += 1;
            }
        }
        tracing::debug!(root = %root.display(), entries = indexed, "artifact cache opened");

        Ok(ArtifactCache {
            root,
            staging,
            state,
        })
    }

    /// Pin and return a committed artifact tree.
    pub fn get(&self, id: &Id) -> Result<ArtifactHandle> {
        if !self.state.pin(id) {
            return Err(Error::NotFound(*id));
        }
        Ok(ArtifactHandle {
            id: *id,
            path: self.entry_path(id),
            state: self.state.clone(),
        })
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.state.is_committed(id)
    }

    /// Reserve the entry and return a writer rooted at an empty staging
    /// directory. Exactly one of `commit`/`abort` applies; dropping the
    /// writer uncommitted aborts.
    pub fn create(&self, id: &Id) -> Result<ArtifactWriter> {
        self.state.begin_write(*id)?;
        let staging_dir = self.staging.join(id.to_string());
        if let Err(err) = fs::create_dir_all(&staging_dir) {
            self.state.abort(*id);
            return Err(err.into());
        }
        Ok(ArtifactWriter {
            id: *id,
            staging_dir,
            final_dir: self.entry_path(id),
            state: self.state.clone(),
            finished: false,
        })
    }

    /// Delete a committed artifact, waiting for outstanding pins first.
    pub fn remove(&self, id: &Id) -> Result<()> {
        self.state.remove_when_unpinned(id)?;
        fs::remove_dir_all(self.entry_path(id))?;
        Ok(())
    }

    fn entry_path(&self, id: &Id) -> PathBuf {
        self.root.join(id.to_string())
    }
}

/// Pinned view of a committed artifact tree.
pub struct ArtifactHandle {
    id: Id,
    path: PathBuf,
    state: Arc<EntryMap>,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        self.state.unpin(&self.id);
    }
}

/// Exclusive writer for one artifact tree.
pub struct ArtifactWriter {
    id: Id,
    staging_dir: PathBuf,
    final_dir: PathBuf,
    state: Arc<EntryMap>,
    finished: bool,
}

impl ArtifactWriter {
    /// Directory the job writes its output into.
    pub fn path(&self) -> &Path {
        &self.staging_dir
    }

    /// Atomically promote the staged tree to a committed entry.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if let Err(err) = fs::rename(&self.staging_dir, &self.final_dir) {
            let _ = fs::remove_dir_all(&self.staging_dir);
            self.state.abort(self.id);
            return Err(err.into());
        }
        self.state.commit(self.id);
        Ok(())
    }

    /// Discard the staged tree and release the writing slot.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        let removed = fs::remove_dir_all(&self.staging_dir);
        self.state.abort(self.id);
        removed?;
        Ok(())
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_dir_all(&self.staging_dir);
            self.state.abort(self.id);
        }
    }
}
