//! Persistent search registration.

use crate::error::{EngineError, EngineResult};
use ecl_protocol::{Dn, PersistentChangeType};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Identifier of a registered persistent search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentSearchId(Uuid);

impl PersistentSearchId {
    /// Creates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PersistentSearchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PersistentSearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persistent search as handed to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentSearch {
    /// Registry key.
    pub id: PersistentSearchId,
    /// Search base.
    pub base: Dn,
    /// Change types the client wants.
    pub change_types: BTreeSet<PersistentChangeType>,
    /// Only changes made after the search started.
    pub changes_only: bool,
    /// Attach entry change notification controls.
    pub return_ecs: bool,
}

/// Lifecycle state inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Registered, not yet receiving changes.
    Registered,
    /// Receiving changes.
    Enabled,
}

/// Keeps track of persistent searches outside the pull loop.
pub trait PersistentSearchRegistry: Send + Sync {
    /// Registers a search.
    fn register(&self, search: &PersistentSearch) -> EngineResult<()>;

    /// Starts delivering changes to a registered search.
    fn enable(&self, id: PersistentSearchId);

    /// Cancels a search and forgets it. Unknown ids are ignored.
    fn cancel(&self, id: PersistentSearchId);
}

/// In-memory registry.
///
/// Holds only live searches: a cancelled search is removed, so its id is
/// unknown afterwards.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    searches: Mutex<HashMap<PersistentSearchId, (PersistentSearch, RegistrationState)>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a search, if known.
    pub fn state(&self, id: PersistentSearchId) -> Option<RegistrationState> {
        self.searches.lock().get(&id).map(|(_, state)| *state)
    }

    /// All searches currently in `state`.
    pub fn in_state(&self, state: RegistrationState) -> Vec<PersistentSearch> {
        self.searches
            .lock()
            .values()
            .filter(|(_, s)| *s == state)
            .map(|(search, _)| search.clone())
            .collect()
    }

    /// Number of live searches.
    pub fn len(&self) -> usize {
        self.searches.lock().len()
    }

    /// Returns true if nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistentSearchRegistry for MemoryRegistry {
    fn register(&self, search: &PersistentSearch) -> EngineResult<()> {
        let mut searches = self.searches.lock();
        if searches.contains_key(&search.id) {
            return Err(EngineError::Registry(format!(
                "persistent search {} already registered",
                search.id
            )));
        }
        searches.insert(search.id, (search.clone(), RegistrationState::Registered));
        Ok(())
    }

    fn enable(&self, id: PersistentSearchId) {
        if let Some((_, state)) = self.searches.lock().get_mut(&id) {
            if *state == RegistrationState::Registered {
                *state = RegistrationState::Enabled;
            }
        }
    }

    fn cancel(&self, id: PersistentSearchId) {
        self.searches.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search() -> PersistentSearch {
        PersistentSearch {
            id: PersistentSearchId::new(),
            base: Dn::parse("cn=changelog").unwrap(),
            change_types: [PersistentChangeType::Add].into_iter().collect(),
            changes_only: false,
            return_ecs: true,
        }
    }

    #[test]
    fn lifecycle() {
        let registry = MemoryRegistry::new();
        let search = search();
        registry.register(&search).unwrap();
        assert_eq!(registry.state(search.id), Some(RegistrationState::Registered));

        registry.enable(search.id);
        assert_eq!(registry.state(search.id), Some(RegistrationState::Enabled));
        assert_eq!(registry.in_state(RegistrationState::Enabled), vec![search.clone()]);

        registry.cancel(search.id);
        registry.cancel(search.id);
        assert_eq!(registry.state(search.id), None);

        registry.enable(search.id);
        assert_eq!(registry.state(search.id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn cancelled_searches_are_evicted() {
        let registry = MemoryRegistry::new();
        let searches: Vec<_> = (0..3).map(|_| search()).collect();
        for search in &searches {
            registry.register(search).unwrap();
            registry.enable(search.id);
        }
        assert_eq!(registry.len(), 3);

        registry.cancel(searches[1].id);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.in_state(RegistrationState::Enabled).len(), 2);

        for search in &searches {
            registry.cancel(search.id);
        }
        assert!(registry.is_empty());

        // A cancelled id may be registered again.
        registry.register(&searches[0]).unwrap();
        assert_eq!(registry.state(searches[0].id), Some(RegistrationState::Registered));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = MemoryRegistry::new();
        let search = search();
        registry.register(&search).unwrap();
        assert!(matches!(
            registry.register(&search),
            Err(EngineError::Registry(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let registry = MemoryRegistry::new();
        registry.enable(PersistentSearchId::new());
        registry.cancel(PersistentSearchId::new());
        assert!(registry.is_empty());
    }
}
