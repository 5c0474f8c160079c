use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Writing,
    Committed { pins: usize },
}

/// In-memory entry index shared by both cache flavors. Guards the
/// absent → writing → committed transitions and the per-entry pin counts;
/// the condvar wakes removers blocked on pinned entries.
#[derive(Default, Debug)]
pub(super) struct EntryMap {
    entries: Mutex<HashMap<Id, EntryState>>,
    unpinned: Condvar,
}

impl EntryMap {
    /// Register an entry found on disk at startup.
    pub fn index_committed(&self, id: Id) {
        self.entries
            .lock()
            .insert(id, EntryState::Committed { pins: 0 });
    }

    /// Reserve the writing slot. Fails with `Exists` if the entry is
    /// committed or another writer holds the slot.
    pub fn begin_write(&self, id: Id) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(Error::Exists(id));
        }
        entries.insert(id, EntryState::Writing);
        Ok(())
    }

    /// Promote a writing entry. Must follow a successful `begin_write`.
    pub fn commit(&self, id: Id) {
        self.entries
            .lock()
            .insert(id, EntryState::Committed { pins: 0 });
    }

    /// Release a writing slot without committing.
    pub fn abort(&self, id: Id) {
        self.entries.lock().remove(&id);
    }

    /// Pin a committed entry. Returns false when the entry is absent or
    /// still being written.
    pub fn pin(&self, id: &Id) -> bool {
        match self.entries.lock().get_mut(id) {
            Some(EntryState::Committed { pins }) => {
                *pins += 1;
                true
            }
            _ => false,
        }
    }

    pub fn unpin(&self, id: &Id) {
        let mut entries = self.entries.lock();
        if let Some(EntryState::Committed { pins }) = entries.get_mut(id) {
            *pins = pins.saturating_sub(1);
            if *pins == 0 {
                self.unpinned.notify_all();
            }
        }
    }

    pub fn is_committed(&self, id: &Id) -> bool {
        matches!(
            self.entries.lock().get(id),
            Some(EntryState::Committed { .. })
        )
    }

    /// Drop a committed entry from the index, waiting for every pin to be
    /// released first.
    pub fn remove_when_unpinned(&self, id: &Id) -> Result<()> {
        let mut entries = self.entries.lock();
        loop {
            match entries.get(id) {
                Some(EntryState::Committed { pins: 0 }) => {
                    entries.remove(id);
                    return Ok(());
                }
                Some(EntryState::Committed { .. }) => self.unpinned.wait(&mut entries),
                _ => return Err(Error::NotFound(*id)),
            }
        }
    }
}
