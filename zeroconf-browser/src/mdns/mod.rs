pub mod browser;
pub mod scan;

use mdns_sd::{IfKind, ServiceDaemon};
use crate::error::DiscoveryError;

pub use browser::{validate_service_type, DiscoveryHandle, DiscoveryService, MdnsDiscovery, Subscription};

/// Create an mDNS daemon, optionally bound to a single interface
pub fn open_daemon(interface: Option<&str>) -> Result<ServiceDaemon, DiscoveryError> {
    let daemon = ServiceDaemon::new()?;
    if let Some(interface) = interface {
        daemon.disable_interface(IfKind::All)?;
        daemon.enable_interface(interface)?;
        tracing::info!(interface, "mDNS daemon bound to interface");
    }
    Ok(daemon)
}
