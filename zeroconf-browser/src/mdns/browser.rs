use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Future;
use shared::types::{DiscoveryEvent, ServiceDetails};
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::session::EventSink;
use super::open_daemon;

/// A running subscription plus the types that could not be browsed.
pub struct Subscription {
    pub handle: DiscoveryHandle,
    pub rejected: Vec<DiscoveryError>,
}

/// Source of add/update/remove notifications for a set of service types.
pub trait DiscoveryService {
    fn start(&self, types: &BTreeSet<String>, sink: EventSink) -> Result<Subscription, DiscoveryError>;

    fn stop(&self, mut handle: DiscoveryHandle) {
        handle.close();
    }
}

/// Owns the daemon and forwarding task of one session. Closing is
/// idempotent and also happens on drop.
#[derive(Default)]
pub struct DiscoveryHandle {
    daemon: Option<ServiceDaemon>,
    browsed: Vec<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// Handle for a session that browses nothing
    pub fn idle() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.daemon.is_some()
    }

    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        for service_type in self.browsed.drain(..) {
            if let Err(e) = daemon.stop_browse(&service_type) {
                tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
            }
        }
        if let Err(e) = daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
        tracing::info!("Discovery session closed");
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct MdnsDiscovery {
    interface: Option<String>,
}

impl MdnsDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            interface: config.interface.clone(),
        }
    }
}

impl DiscoveryService for MdnsDiscovery {
    fn start(&self, types: &BTreeSet<String>, sink: EventSink) -> Result<Subscription, DiscoveryError> {
        let mut rejected = Vec::new();
        let valid: Vec<&String> = types
            .iter()
            .filter(|service_type| match validate_service_type(service_type) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("{}", e);
                    rejected.push(e);
                    false
                }
            })
            .collect();

        if valid.is_empty() {
            tracing::info!("No service types to browse");
            return Ok(Subscription {
                handle: DiscoveryHandle::idle(),
                rejected,
            });
        }

        let daemon = open_daemon(self.interface.as_deref())?;
        let mut browsed = Vec::new();
        let mut receivers = Vec::new();
        for service_type in valid {
            match daemon.browse(service_type) {
                Ok(receiver) => {
                    browsed.push(service_type.clone());
                    receivers.push(receiver);
                }
                Err(e) => {
                    tracing::warn!("Failed to browse {}: {}", service_type, e);
                    rejected.push(DiscoveryError::MalformedType {
                        service_type: service_type.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(session = sink.session(), types = ?browsed, "Starting mDNS browser");

        let cancel = CancellationToken::new();
        let browser_cancel = cancel.clone();
        let task = tokio::spawn(run_browser(receivers, sink, browser_cancel));

        Ok(Subscription {
            handle: DiscoveryHandle {
                daemon: Some(daemon),
                browsed,
                cancel,
                task: Some(task),
            },
            rejected,
        })
    }
}

/// Shape check run before handing a type to the daemon:
/// `_name._tcp.local.` or `_name._udp.local.`
pub fn validate_service_type(service_type: &str) -> Result<(), DiscoveryError> {
    let malformed = |reason: &str| DiscoveryError::MalformedType {
        service_type: service_type.to_string(),
        reason: reason.to_string(),
    };

    let name = service_type
        .strip_suffix("._tcp.local.")
        .or_else(|| service_type.strip_suffix("._udp.local."))
        .ok_or_else(|| malformed("must end with '._tcp.local.' or '._udp.local.'"))?;

    match name.strip_prefix('_') {
        Some(label) if !label.is_empty() && !label.contains('.') => Ok(()),
        Some(_) => Err(malformed("service name must be a single non-empty label")),
        None => Err(malformed("service name must start with '_'")),
    }
}

type RecvResult = (usize, flume::Receiver<ServiceEvent>, std::result::Result<ServiceEvent, flume::RecvError>);
type RecvFuture = Pin<Box<dyn Future<Output = RecvResult> + Send>>;

/// Waits for the next event of one browsed type and hands the receiver
/// back so the loop can queue the following wait.
fn make_recv_future(idx: usize, rx: flume::Receiver<ServiceEvent>) -> RecvFuture {
    Box::pin(async move {
        let result = rx.recv_async().await;
        (idx, rx, result)
    })
}

/// Forwards daemon events into the session sink until cancelled.
/// Each receiver is drained in order, so per-service ordering holds.
async fn run_browser(
    receivers: Vec<flume::Receiver<ServiceEvent>>,
    sink: EventSink,
    cancel: CancellationToken,
) {
    let mut resolved = HashSet::new();
    let mut type_futures: FuturesUnordered<RecvFuture> = receivers
        .into_iter()
        .enumerate()
        .map(|(idx, rx)| make_recv_future(idx, rx))
        .collect();

    loop {
        tokio::select! {
            Some((idx, rx, result)) = type_futures.next() => {
                match result {
                    Ok(event) => {
                        if let Some(event) = translate(event, &mut resolved) {
                            if !sink.emit(event) {
                                tracing::debug!("Control loop gone, stopping browser");
                                break;
                            }
                        }
                        type_futures.push(make_recv_future(idx, rx));
                    }
                    Err(e) => {
                        tracing::warn!("Receiver {} disconnected: {}", idx, e);
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::debug!(session = sink.session(), "mDNS browser shutting down");
                break;
            }
        }
    }
}

/// The first resolution of a name in a session is an add, later ones are
/// updates. A removal forgets the name so a re-announcement adds again.
fn translate(event: ServiceEvent, resolved: &mut HashSet<String>) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let name = info.get_fullname().to_string();
            let service_type = info.get_type().to_string();
            let details = details_from_info(&info);
            if resolved.insert(name.clone()) {
                Some(DiscoveryEvent::Added { name, service_type, details })
            } else {
                Some(DiscoveryEvent::Updated { name, service_type, details })
            }
        }
        ServiceEvent::ServiceRemoved(service_type, name) => {
            resolved.remove(&name);
            Some(DiscoveryEvent::Removed { name, service_type })
        }
        other => {
            tracing::trace!(?other, "Ignoring mDNS event");
            None
        }
    }
}

/// Convert an mdns-sd ServiceInfo to our ServiceDetails
pub fn details_from_info(info: &ServiceInfo) -> ServiceDetails {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    for addr in info.get_addresses() {
        match addr {
            IpAddr::V4(v4) => ipv4.push(*v4),
            IpAddr::V6(v6) => ipv6.push(*v6),
        }
    }
    ipv4.sort();
    ipv6.sort();

    // Empty keys and valueless flags are not shown
    let properties = info
        .get_properties()
        .iter()
        .filter(|prop| !prop.key().is_empty() && prop.val().is_some())
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    ServiceDetails {
        server: info.get_hostname().to_string(),
        port: info.get_port(),
        ipv4,
        ipv6,
        properties,
    }
}
