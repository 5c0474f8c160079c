use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::state::EntryMap;
use crate::error::{Error, Result};
use crate::id::Id;

const STAGING_DIR: &str = "staging";

/// Content-addressed store of single files. Committed entries live at
/// `<root>/<hex id>` and are immutable.
pub struct FileCache {
    root: PathBuf,
    staging: PathBuf,
    state: Arc<EntryMap>,
}

impl FileCache {
    /// Open a cache rooted at `root`, sweeping stale staging entries and
    /// re-indexing committed files left by a previous process.
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
        tracing::debug!(root = %root.display(), entries = indexed, "file cache opened");

        Ok(FileCache {
            root,
            staging,
            state,
        })
    }

    /// Pin and return a committed entry. The pin is released when the
    /// returned handle is dropped.
    pub fn get(&self, id: &Id) -> Result<FileHandle> {
        if !self.state.pin(id) {
            return Err(Error::NotFound(*id));
        }
        Ok(FileHandle {
            id: *id,
            path: self.entry_path(id),
            state: self.state.clone(),
        })
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.state.is_committed(id)
    }

    /// Reserve the entry and return a sink for its bytes. Exactly one of
    /// `commit`/`abort` applies; dropping the writer uncommitted aborts.
    pub fn write(&self, id: &Id) -> Result<FileWriter> {
        self.state.begin_write(*id)?;
        let staging_path = self.staging.join(id.to_string());
        let file = match fs::File::create(&staging_path) {
            Ok(file) => file,
            Err(err) => {
                self.state.abort(*id);
                return Err(err.into());
            }
        };
        Ok(FileWriter {
            id: *id,
            inner: Some(WriterInner {
                file,
                staging_path,
                final_path: self.entry_path(id),
            }),
            state: self.state.clone(),
        })
    }

    /// Delete a committed entry, waiting for outstanding pins first.
    pub fn remove(&self, id: &Id) -> Result<()> {
        self.state.remove_when_unpinned(id)?;
        fs::remove_file(self.entry_path(id))?;
        Ok(())
    }

    fn entry_path(&self, id: &Id) -> PathBuf {
        self.root.join(id.to_string())
    }
}

/// Pinned view of a committed file.
#[derive(Debug)]
pub struct FileHandle {
    id: Id,
    path: PathBuf,
    state: Arc<EntryMap>,
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.state.unpin(&self.id);
    }
}

struct WriterInner {
    file: fs::File,
    staging_path: PathBuf,
    final_path: PathBuf,
}

/// Exclusive writer for one cache entry.
pub struct FileWriter {
    id: Id,
    inner: Option<WriterInner>,
    state: Arc<EntryMap>,
}

impl FileWriter {
    /// Atomically promote the staged bytes to a committed entry. On failure
    /// the staged bytes are discarded and the writing slot released.
    pub fn commit(mut self) -> Result<()> {
        let inner = self
            .inner
            .take()
            .expect("file writer consumed more than once");
        let synced = inner.file.sync_all();
        drop(inner.file);
        if let Err(err) = synced.and_then(|_| fs::rename(&inner.staging_path, &inner.final_path)) {
            let _ = fs::remove_file(&inner.staging_path);
            self.state.abort(self.id);
            return Err(err.into());
        }
        self.state.commit(self.id);
        Ok(())
    }

    /// Discard the staged bytes and release the writing slot.
    pub fn abort(mut self) -> Result<()> {
        self.discard()
    }

    fn discard(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            drop(inner.file);
            let removed = fs::remove_file(&inner.staging_path);
            self.state.abort(self.id);
            removed?;
        }
        Ok(())
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.file.write(buf),
            None => Err(io::Error::other("file writer already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        let _ = self.discard();
    }
}
