use std::collections::BTreeSet;
use shared::protocol::{KEY_SERVERS_EXPANDED, KEY_SERVICES_EXPANDED};
use crate::error::SettingsError;
use crate::settings::{load_set, save_set, SettingsStore};
use crate::tree::{NodeKey, ServiceTree, TreeChange};

/// Server and service keys the user last left expanded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpansionState {
    pub servers: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

impl ExpansionState {
    pub fn load(store: &dyn SettingsStore) -> Self {
        Self {
            servers: load_set(store, KEY_SERVERS_EXPANDED),
            services: load_set(store, KEY_SERVICES_EXPANDED),
        }
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        save_set(store, KEY_SERVERS_EXPANDED, &self.servers)?;
        save_set(store, KEY_SERVICES_EXPANDED, &self.services)
    }

    /// Walks the tree and records every expanded row.
    pub fn capture(tree: &ServiceTree) -> Self {
        let mut state = Self::default();
        for server in tree.servers() {
            if server.expanded {
                state.servers.insert(server.key().to_string());
            }
            for service in server.services() {
                if service.expanded {
                    state.services.insert(service.key().to_string());
                }
            }
        }
        state
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        match key {
            NodeKey::Server(k) => self.servers.contains(k),
            NodeKey::Service(k) => self.services.contains(k),
        }
    }
}

/// Restores expansion on rows as they (re)appear and persists it whenever
/// the user toggles a row.
#[derive(Debug, Default)]
pub struct ExpansionTracker {
    state: ExpansionState,
}

impl ExpansionTracker {
    pub fn load(store: &dyn SettingsStore) -> Self {
        Self {
            state: ExpansionState::load(store),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ExpansionState {
        &self.state
    }

    /// Expands inserted or rebuilt rows whose key was saved as expanded.
    /// Returns how many rows were expanded.
    pub fn restore(&self, tree: &mut ServiceTree, changes: &[TreeChange]) -> usize {
        let mut restored = 0;
        for change in changes {
            let key = match change {
                TreeChange::RowInserted(key) | TreeChange::RowChanged(key) => key,
                TreeChange::RowRemoved(_) => continue,
            };
            if self.state.contains(key) && !tree.is_expanded(key) && tree.set_expanded(key, true) {
                restored += 1;
            }
        }
        restored
    }

    /// Applies a user toggle, then recomputes both sets from the current tree.
    pub fn toggled(
        &mut self,
        tree: &mut ServiceTree,
        key: &NodeKey,
        expanded: bool,
        store: &mut dyn SettingsStore,
    ) -> Result<(), SettingsError> {
        if !tree.set_expanded(key, expanded) {
            tracing::debug!(?key, "Toggle for a row that is gone");
        }
        self.state = ExpansionState::capture(tree);
        self.state.save(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use shared::types::ServiceDetails;
    use crate::settings::MemorySettings;

    fn details(server: &str) -> ServiceDetails {
        ServiceDetails {
            server: server.to_string(),
            port: 80,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            properties: BTreeMap::from([("path".to_string(), "/".to_string())]),
        }
    }

    fn populated() -> ServiceTree {
        let mut tree = ServiceTree::new();
        tree.insert_service("host1.local.", "svc1", "_http._tcp.local.", &details("host1.local."))
            .unwrap();
        tree.insert_service("host2.local.", "svc2", "_http._tcp.local.", &details("host2.local."))
            .unwrap();
        tree
    }

    #[test]
    fn test_expansion_survives_rebuild() {
        let mut store = MemorySettings::default();
        let mut tracker = ExpansionTracker::load(&store);
        let mut tree = populated();
        tree.take_changes();

        let server = NodeKey::Server("host1.local.".to_string());
        let service = NodeKey::Service("svc1".to_string());
        tracker.toggled(&mut tree, &server, true, &mut store).unwrap();
        tracker.toggled(&mut tree, &service, true, &mut store).unwrap();

        // Fresh process: reload from the store and replay the adds
        let tracker = ExpansionTracker::load(&store);
        let mut rebuilt = populated();
        let changes = rebuilt.take_changes();
        assert_eq!(tracker.restore(&mut rebuilt, &changes), 2);

        assert!(rebuilt.is_expanded(&server));
        assert!(rebuilt.is_expanded(&service));
        assert!(!rebuilt.is_expanded(&NodeKey::Server("host2.local.".to_string())));
    }

    #[test]
    fn test_capture_drops_vanished_rows() {
        let mut store = MemorySettings::default();
        let mut tracker = ExpansionTracker::load(&store);
        let mut tree = populated();

        let svc2 = NodeKey::Service("svc2".to_string());
        tracker.toggled(&mut tree, &svc2, true, &mut store).unwrap();
        assert!(tracker.state().services.contains("svc2"));

        tree.remove_service("svc2");
        let svc1 = NodeKey::Service("svc1".to_string());
        tracker.toggled(&mut tree, &svc1, true, &mut store).unwrap();

        assert_eq!(tracker.state().services, BTreeSet::from(["svc1".to_string()]));
        assert_eq!(ExpansionState::load(&store), *tracker.state());
    }

    #[test]
    fn test_collapse_is_persisted() {
        let mut store = MemorySettings::default();
        let mut tracker = ExpansionTracker::load(&store);
        let mut tree = populated();
        let key = NodeKey::Server("host1.local.".to_string());

        tracker.toggled(&mut tree, &key, true, &mut store).unwrap();
        tracker.toggled(&mut tree, &key, false, &mut store).unwrap();
        assert!(ExpansionState::load(&store).servers.is_empty());
    }

    #[test]
    fn test_restore_reapplies_after_update() {
        let mut store = MemorySettings::default();
        store.set(KEY_SERVICES_EXPANDED, r#"["svc1"]"#).unwrap();
        let tracker = ExpansionTracker::load(&store);

        let mut tree = populated();
        tree.take_changes();
        tree.update_service("svc1", &details("host1.local."));
        let changes = tree.take_changes();
        assert_eq!(tracker.restore(&mut tree, &changes), 1);
        assert!(tree.is_expanded(&NodeKey::Service("svc1".to_string())));
    }
}
