use std::collections::BTreeSet;
use std::time::Duration;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use shared::protocol::{LOCAL_DOMAIN, META_QUERY_TYPE};
use crate::error::DiscoveryError;
use super::open_daemon;

/// Listens to the meta-query for `duration` and returns every service
/// type that answered.
pub async fn scan_known_types(
    interface: Option<String>,
    duration: Duration,
) -> Result<BTreeSet<String>, DiscoveryError> {
    let daemon = open_daemon(interface.as_deref())?;
    let receiver = browse_or_shutdown(&daemon, META_QUERY_TYPE)?;

    tracing::info!(secs = duration.as_secs_f32(), "Scanning for service types");

    let deadline = tokio::time::Instant::now() + duration;
    let mut found = BTreeSet::new();
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceFound(_, fullname))) => {
                insert_type(&mut found, fullname);
            }
            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                insert_type(&mut found, info.get_type().to_string());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!("Type scan receiver closed: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    shutdown(&daemon);

    tracing::info!(count = found.len(), "Type scan finished");
    Ok(found)
}

/// Browses `service_type`, shutting the daemon down if the browse fails.
fn browse_or_shutdown(
    daemon: &ServiceDaemon,
    service_type: &str,
) -> Result<flume::Receiver<ServiceEvent>, DiscoveryError> {
    daemon.browse(service_type).map_err(|e| {
        shutdown(daemon);
        DiscoveryError::from(e)
    })
}

fn shutdown(daemon: &ServiceDaemon) {
    if let Err(e) = daemon.shutdown() {
        tracing::warn!("Failed to shut down scan daemon: {}", e);
    }
}

fn insert_type(found: &mut BTreeSet<String>, service_type: String) {
    if service_type.ends_with(LOCAL_DOMAIN) && service_type != META_QUERY_TYPE {
        found.insert(service_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_type_skips_meta_and_foreign_domains() {
        let mut found = BTreeSet::new();
        insert_type(&mut found, "_http._tcp.local.".to_string());
        insert_type(&mut found, META_QUERY_TYPE.to_string());
        insert_type(&mut found, "_http._tcp.example.com.".to_string());
        assert_eq!(found, BTreeSet::from(["_http._tcp.local.".to_string()]));
    }

    #[test]
    fn test_failed_browse_shuts_daemon_down() {
        let Ok(daemon) = ServiceDaemon::new() else {
            // No multicast sockets in this environment
            return;
        };
        assert!(browse_or_shutdown(&daemon, "bogus").is_err());

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        loop {
            let stopped = match daemon.status() {
                Err(_) => true,
                Ok(rx) => !matches!(
                    rx.recv_timeout(Duration::from_millis(200)),
                    Ok(mdns_sd::DaemonStatus::Running)
                ),
            };
            if stopped {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "daemon still running");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
