use shared::types::EventKind;
use thiserror::Error;

/// Structural errors raised by the service tree itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Callers must check for an existing service before inserting.
    #[error("service {service} is already present in the tree")]
    DuplicateInsert { service: String },
}

/// Errors contained at the discovery-event handler boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// An update or remove for a service that is not in the tree.
    #[error("{kind} event for unknown service {service}")]
    Orphan { kind: EventKind, service: String },

    /// More than one node carries a key that must be unique.
    #[error("multiple items found for {service} ({count})")]
    MultipleMatch { service: String, count: usize },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("bad service type {service_type}: {reason}")]
    MalformedType { service_type: String, reason: String },

    #[error("mDNS daemon error: {0}")]
    Daemon(#[from] mdns_sd::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("failed to encode setting {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
