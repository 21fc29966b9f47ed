//! Directory entry lookup used by the assertion control.

use crate::error::EngineResult;
use ecl_protocol::{Dn, Entry};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Fetches entries by DN.
pub trait DirectoryLookup: Send + Sync {
    /// Returns the entry, or `None` if it does not exist.
    fn get_entry(&self, dn: &Dn) -> EngineResult<Option<Entry>>;
}

/// In-memory entry map.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<Dn, Entry>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&self, entry: Entry) {
        self.entries.write().insert(entry.dn().clone(), entry);
    }

    /// Builder-style [`MemoryDirectory::insert`].
    pub fn with_entry(self, entry: Entry) -> Self {
        self.insert(entry);
        self
    }
}

impl DirectoryLookup for MemoryDirectory {
    fn get_entry(&self, dn: &Dn) -> EngineResult<Option<Entry>> {
        Ok(self.entries.read().get(dn).cloned())
    }
}
