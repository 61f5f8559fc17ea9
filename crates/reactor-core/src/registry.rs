//! Process-local bridge between serializable activity I/O and the live,
//! non-serializable OS handles a cell owns.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::client::AgentClient;
use crate::supervisor::ServerHandle;

/// The key under which a cell's live handles are registered: `(cellID, port,
/// worktreeID)`. Serializable so it can travel inside activity input/output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub cell_id: String,
    pub port: u16,
    pub worktree_id: String,
}

struct Entry {
    handle: ServerHandle,
    client: AgentClient,
}

/// A process-wide map from [`RegistryKey`] to live `(ServerHandle,
/// AgentClient)` pairs.
///
/// Empty after every worker restart; any OS state left behind by a prior
/// crash is recovered by the startup housekeeping scan, not by this map.
#[derive(Default)]
pub struct GlobalRegistry {
    entries: Mutex<HashMap<RegistryKey, Entry>>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: RegistryKey, handle: ServerHandle, client: AgentClient) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key, Entry { handle, client });
    }

    /// Returns the registered client for `key`, if the cell is still live.
    pub fn client(&self, key: &RegistryKey) -> Option<AgentClient> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|e| e.client.clone())
    }

    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    /// Removes and returns the entry for `key`, handing ownership of the
    /// live `ServerHandle` to the caller (typically `TeardownCell`).
    pub fn remove(&self, key: &RegistryKey) -> Option<(ServerHandle, AgentClient)> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key).map(|e| (e.handle, e.client))
    }

    /// Finds the live client for a cell by `cellID` alone, for activities
    /// (like `RunScript`) that only carry the cell id rather than the full
    /// registry key.
    pub fn client_for_cell(&self, cell_id: &str) -> Option<AgentClient> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|(k, _)| k.cell_id == cell_id)
            .map(|(_, e)| e.client.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u16) -> RegistryKey {
        RegistryKey {
            cell_id: format!("cell-{n}"),
            port: n,
            worktree_id: format!("wt-{n}"),
        }
    }

    #[test]
    fn remove_absent_key_returns_none() {
        let registry = GlobalRegistry::new();
        assert!(registry.remove(&key(1)).is_none());
    }

    #[test]
    fn contains_is_false_before_insert_and_after_remove() {
        let registry = GlobalRegistry::new();
        let k = key(1);
        assert!(!registry.contains(&k));
    }

    #[test]
    fn client_lookup_returns_none_for_unregistered_key() {
        let registry = GlobalRegistry::new();
        assert!(registry.client(&key(2)).is_none());
    }

    #[test]
    fn len_starts_at_zero() {
        let registry = GlobalRegistry::new();
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }
}
