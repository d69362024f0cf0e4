//! Known and active service types.
//!
//! `known` is everything offered to the user, `active` is what the
//! session subscribes to. Every change that affects browsing returns
//! true so the caller restarts the session.

use std::collections::BTreeSet;
use shared::protocol::{KEY_TYPES, KEY_TYPES_FILTERED, LOCAL_DOMAIN};
use crate::error::SettingsError;
use crate::settings::{load_set, save_set, SettingsStore};

/// Tri-state selection of one type in the filter dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChoice {
    /// Browsed and kept
    Checked,
    /// Kept but not browsed
    Partial,
    /// Forgotten
    Unchecked,
}

impl TypeChoice {
    /// Dialog cycling order
    pub fn next(self) -> Self {
        match self {
            TypeChoice::Checked => TypeChoice::Unchecked,
            TypeChoice::Unchecked => TypeChoice::Partial,
            TypeChoice::Partial => TypeChoice::Checked,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypeFilter {
    known: BTreeSet<String>,
    active: BTreeSet<String>,
}

impl TypeFilter {
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut known = load_set(store, KEY_TYPES);
        let active = load_set(store, KEY_TYPES_FILTERED);
        known.extend(active.iter().cloned());
        Self { known, active }
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    pub fn active(&self) -> &BTreeSet<String> {
        &self.active
    }

    fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        save_set(store, KEY_TYPES, &self.known)?;
        save_set(store, KEY_TYPES_FILTERED, &self.active)
    }

    /// Adds a type to the known set without activating it.
    pub fn add_type(
        &mut self,
        service_type: &str,
        store: &mut dyn SettingsStore,
    ) -> Result<bool, SettingsError> {
        let service_type = service_type.trim();
        if service_type.is_empty() || self.known.contains(service_type) {
            return Ok(false);
        }
        self.known.insert(service_type.to_string());
        save_set(store, KEY_TYPES, &self.known)?;
        tracing::info!(service_type, "Added service type");
        Ok(true)
    }

    /// Initial dialog state: every known type, Checked when active and
    /// Partial otherwise.
    pub fn choices(&self) -> Vec<(String, TypeChoice)> {
        self.known
            .iter()
            .map(|t| {
                let choice = if self.active.contains(t) {
                    TypeChoice::Checked
                } else {
                    TypeChoice::Partial
                };
                (t.clone(), choice)
            })
            .collect()
    }

    /// Replaces the active set from an accepted dialog. Names outside the
    /// `.local.` domain are ignored; Unchecked names are forgotten.
    pub fn set_active_types(
        &mut self,
        choices: &[(String, TypeChoice)],
        store: &mut dyn SettingsStore,
    ) -> Result<bool, SettingsError> {
        self.active.clear();
        for (service_type, choice) in choices {
            if !service_type.ends_with(LOCAL_DOMAIN) {
                continue;
            }
            match choice {
                TypeChoice::Checked => {
                    self.active.insert(service_type.clone());
                    self.known.insert(service_type.clone());
                }
                TypeChoice::Partial => {
                    self.known.insert(service_type.clone());
                }
                TypeChoice::Unchecked => {
                    self.known.remove(service_type);
                }
            }
        }
        self.save(store)?;
        tracing::info!(active = ?self.active, "Type filter changed");
        Ok(true)
    }
}
