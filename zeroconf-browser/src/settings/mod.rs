pub mod db;

use std::collections::BTreeSet;
use crate::error::SettingsError;

pub use db::SettingsDb;

/// String key-value store for persisted UI state.
pub trait SettingsStore {
    fn get(&self, key: &str, default: &str) -> String;
    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// Volatile store for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl SettingsStore for MemorySettings {
    fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads a JSON array of strings. Anything else loads as an empty set.
pub fn load_set(store: &dyn SettingsStore, key: &str) -> BTreeSet<String> {
    let raw = store.get(key, "[]");
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(values) => values.into_iter().collect(),
        Err(e) => {
            tracing::warn!(key, value = %raw, "Ignoring unreadable setting: {}", e);
            BTreeSet::new()
        }
    }
}

pub fn save_set(
    store: &mut dyn SettingsStore,
    key: &str,
    values: &BTreeSet<String>,
) -> Result<(), SettingsError> {
    let json = serde_json::to_string(values).map_err(|source| SettingsError::Json {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &json)
}
