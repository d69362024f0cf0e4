use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Resolved details of one service instance.
/// Produced by the discovery adapter and consumed by the service tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceDetails {
    /// Advertised target host, e.g. "nas.local."
    pub server: String,

    /// Service port
    pub port: u16,

    pub ipv4: Vec<Ipv4Addr>,

    pub ipv6: Vec<Ipv6Addr>,

    /// Decoded TXT properties; empty keys and valueless entries are already dropped
    pub properties: BTreeMap<String, String>,
}

impl ServiceDetails {
    /// Display value for the service row, `host:port`
    pub fn address_value(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Added => "add",
            EventKind::Updated => "update",
            EventKind::Removed => "remove",
        };
        f.write_str(name)
    }
}

/// A discovery notification for one service instance, keyed by its full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added {
        name: String,
        service_type: String,
        details: ServiceDetails,
    },
    Updated {
        name: String,
        service_type: String,
        details: ServiceDetails,
    },
    Removed {
        name: String,
        service_type: String,
    },
}

impl DiscoveryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DiscoveryEvent::Added { .. } => EventKind::Added,
            DiscoveryEvent::Updated { .. } => EventKind::Updated,
            DiscoveryEvent::Removed { .. } => EventKind::Removed,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DiscoveryEvent::Added { name, .. }
            | DiscoveryEvent::Updated { name, .. }
            | DiscoveryEvent::Removed { name, .. } => name,
        }
    }

    pub fn service_type(&self) -> &str {
        match self {
            DiscoveryEvent::Added { service_type, .. }
            | DiscoveryEvent::Updated { service_type, .. }
            | DiscoveryEvent::Removed { service_type, .. } => service_type,
        }
    }
}
