//! One browsing session: the service tree plus the per-service locks that
//! serialize add/update handling for a single service name.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, OwnedMutexGuard};
use shared::types::{DiscoveryEvent, EventKind};
use crate::error::ReconcileError;
use crate::tree::ServiceTree;

pub type SessionId = u64;

/// A discovery event stamped with the session that produced it.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: DiscoveryEvent,
}

/// Marshals discovery callbacks onto the control loop. One channel per
/// application keeps per-service emission order intact.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the control loop has gone away.
    pub fn emit(&self, event: DiscoveryEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Per-service mutual exclusion. The gate is held only while looking up or
/// creating the entry for a name; the entry itself is held for the whole
/// mutation of that service.
#[derive(Debug, Default)]
pub struct ServiceLocks {
    gate: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ServiceLocks {
    pub async fn acquire(&self, service: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            gate.entry(service.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drops the entry for a removed service unless someone is waiting on it.
    pub fn forget(&self, service: &str) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.get(service).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            gate.remove(service);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    types: BTreeSet<String>,
    tree: Mutex<ServiceTree>,
    locks: ServiceLocks,
}

impl Session {
    pub fn new(id: SessionId, types: BTreeSet<String>) -> Self {
        Self {
            id,
            types,
            tree: Mutex::new(ServiceTree::new()),
            locks: ServiceLocks::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Types this session subscribed to
    pub fn types(&self) -> &BTreeSet<String> {
        &self.types
    }

    pub fn tree(&self) -> MutexGuard<'_, ServiceTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn locks(&self) -> &ServiceLocks {
        &self.locks
    }

    /// Applies one discovery event to the tree.
    ///
    /// An add for a service that is already present updates it in place
    /// (last write wins). Updates and removes for unknown services come
    /// back as [`ReconcileError::Orphan`] and leave the tree untouched.
    pub async fn apply(&self, event: DiscoveryEvent) -> Result<(), ReconcileError> {
        match event {
            DiscoveryEvent::Added { name, service_type, details } => {
                let _guard = self.locks.acquire(&name).await;
                let mut tree = self.tree();
                match tree.service_matches(&name) {
                    0 => {
                        tree.insert_service(&details.server, &name, &service_type, &details)?;
                        tracing::debug!(service = %name, server = %details.server, "Service added");
                        Ok(())
                    }
                    1 => {
                        tracing::warn!(service = %name, "Duplicate add, updating in place");
                        tree.update_service(&name, &details);
                        Ok(())
                    }
                    count => {
                        tree.update_service(&name, &details);
                        Err(ReconcileError::MultipleMatch { service: name, count })
                    }
                }
            }
            DiscoveryEvent::Updated { name, details, .. } => {
                let _guard = self.locks.acquire(&name).await;
                let mut tree = self.tree();
                match tree.service_matches(&name) {
                    0 => Err(ReconcileError::Orphan {
                        kind: EventKind::Updated,
                        service: name,
                    }),
                    count => {
                        tree.update_service(&name, &details);
                        tracing::debug!(
                            service = %name,
                            server = tree.owner_of(&name).unwrap_or_default(),
                            "Service updated"
                        );
                        if count > 1 {
                            Err(ReconcileError::MultipleMatch { service: name, count })
                        } else {
                            Ok(())
                        }
                    }
                }
            }
            DiscoveryEvent::Removed { name, .. } => {
                let removed = self.tree().remove_service(&name);
                self.locks.forget(&name);
                match removed {
                    Some(node) => {
                        tracing::debug!(
                            service = %name,
                            service_type = node.service_type(),
                            "Service removed"
                        );
                        Ok(())
                    }
                    None => Err(ReconcileError::Orphan {
                        kind: EventKind::Removed,
                        service: name,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use shared::types::ServiceDetails;

    const SVC: &str = "svc1._http._tcp.local.";
    const TYPE: &str = "_http._tcp.local.";

    fn details(server: &str, port: u16) -> ServiceDetails {
        ServiceDetails {
            server: server.to_string(),
            port,
            ipv4: vec![Ipv4Addr::new(192, 168, 1, 5)],
            ipv6: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    fn added(name: &str, server: &str, port: u16) -> DiscoveryEvent {
        DiscoveryEvent::Added {
            name: name.to_string(),
            service_type: TYPE.to_string(),
            details: details(server, port),
        }
    }

    fn updated(name: &str, server: &str, port: u16) -> DiscoveryEvent {
        DiscoveryEvent::Updated {
            name: name.to_string(),
            service_type: TYPE.to_string(),
            details: details(server, port),
        }
    }

    fn removed(name: &str) -> DiscoveryEvent {
        DiscoveryEvent::Removed {
            name: name.to_string(),
            service_type: TYPE.to_string(),
        }
    }

    fn session() -> Session {
        Session::new(1, BTreeSet::from([TYPE.to_string()]))
    }

    #[tokio::test]
    async fn test_add_update_remove_leaves_nothing() {
        let session = session();
        session.apply(added(SVC, "host1.local.", 80)).await.unwrap();
        session.apply(updated(SVC, "host1.local.", 81)).await.unwrap();
        assert_eq!(
            session.tree().find_service(SVC).unwrap().address_value(),
            "host1.local.:81"
        );
        session.apply(removed(SVC)).await.unwrap();

        let tree = session.tree();
        assert!(tree.find_service(SVC).is_none());
        assert!(tree.find_server("host1.local.").is_none());
    }

    #[tokio::test]
    async fn test_update_before_add_does_not_crash() {
        let session = session();
        let err = session.apply(updated(SVC, "host1.local.", 80)).await.unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Orphan {
                kind: EventKind::Updated,
                service: SVC.to_string(),
            }
        );
        assert!(session.tree().is_empty());

        session.apply(added(SVC, "host1.local.", 80)).await.unwrap();
        session.apply(removed(SVC)).await.unwrap();
        assert!(session.tree().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_orphan() {
        let session = session();
        let err = session.apply(removed(SVC)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Orphan { kind: EventKind::Removed, .. }));
        assert!(session.tree().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_add_updates_in_place() {
        let session = session();
        session.apply(added(SVC, "host1.local.", 80)).await.unwrap();
        session.apply(added(SVC, "host1.local.", 8080)).await.unwrap();

        let tree = session.tree();
        assert_eq!(tree.service_matches(SVC), 1);
        assert_eq!(tree.find_service(SVC).unwrap().address_value(), "host1.local.:8080");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_insert_once() {
        let session = Arc::new(session());
        let mut handles = Vec::new();
        for port in 0..16u16 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.apply(added(SVC, "host1.local.", port)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tree = session.tree();
        assert_eq!(tree.service_matches(SVC), 1);
        assert_eq!(tree.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_two_services_share_server() {
        let session = session();
        session.apply(added("a._http._tcp.local.", "host2.local.", 80)).await.unwrap();
        session.apply(added("b._http._tcp.local.", "host2.local.", 80)).await.unwrap();

        let tree = session.tree();
        assert_eq!(tree.servers().len(), 1);
        assert_eq!(tree.find_server("host2.local.").unwrap().services().len(), 2);
    }

    #[tokio::test]
    async fn test_multiple_match_is_reported() {
        let session = session();
        {
            let mut tree = session.tree();
            tree.insert_unchecked("host1.local.", SVC, &details("host1.local.", 80));
            tree.insert_unchecked("host1.local.", SVC, &details("host1.local.", 80));
        }
        let err = session.apply(updated(SVC, "host1.local.", 81)).await.unwrap_err();
        assert_eq!(
            err,
            ReconcileError::MultipleMatch {
                service: SVC.to_string(),
                count: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_remove_forgets_lock_entry() {
        let session = session();
        session.apply(added(SVC, "host1.local.", 80)).await.unwrap();
        assert_eq!(session.locks().len(), 1);
        session.apply(removed(SVC)).await.unwrap();
        assert_eq!(session.locks().len(), 0);
    }

    #[test]
    fn test_sink_stamps_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(removed(SVC)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, 7);
        assert_eq!(event.event.name(), SVC);

        drop(rx);
        assert!(!sink.emit(removed(SVC)));
    }
}
