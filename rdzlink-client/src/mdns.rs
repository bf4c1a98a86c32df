//! mDNS/DNS-SD browser backed by `mdns-sd`.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use rdzlink_rs_protocol::ServiceAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::browser::{BrowseEvent, ServiceBrowser};
use crate::error::{ClientError, Result};

/// Browses the local network with a pure-Rust mDNS responder.
///
/// The daemon is created on the first `browse` and shut down on drop.
#[derive(Default)]
pub struct MdnsBrowser {
    daemon: Option<ServiceDaemon>,
    bridge: Option<JoinHandle<()>>,
}

impl MdnsBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn daemon(&mut self) -> Result<ServiceDaemon> {
        if let Some(daemon) = &self.daemon {
            return Ok(daemon.clone());
        }
        let daemon = ServiceDaemon::new().map_err(|e| ClientError::Discovery(e.to_string()))?;
        self.daemon = Some(daemon.clone());
        Ok(daemon)
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(&mut self, service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>> {
        let daemon = self.daemon()?;
        let receiver = daemon
            .browse(service_type)
            .map_err(|e| ClientError::Discovery(e.to_string()))?;
        debug!(service_type, "mDNS browse started");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.bridge.take() {
            previous.abort();
        }
        self.bridge = Some(tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let Some(event) = translate(event) else {
                    continue;
                };
                trace!(?event, "mDNS event");
                if tx.send(event).is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    fn stop_browse(&mut self, service_type: &str) -> Result<()> {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
        if let Some(daemon) = &self.daemon {
            daemon
                .stop_browse(service_type)
                .map_err(|e| ClientError::Discovery(e.to_string()))?;
            debug!(service_type, "mDNS browse stopped");
        }
        Ok(())
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.shutdown();
        }
    }
}

fn translate(event: ServiceEvent) -> Option<BrowseEvent> {
    match event {
        ServiceEvent::ServiceFound(_, fullname) => Some(BrowseEvent::Found { instance: fullname }),
        ServiceEvent::ServiceResolved(info) => Some(resolved(&info)),
        ServiceEvent::ServiceRemoved(_, fullname) => {
            Some(BrowseEvent::Removed { instance: fullname })
        }
        _ => None,
    }
}

/// Picks an IPv4 address when the record carries one.
fn resolved(info: &ServiceInfo) -> BrowseEvent {
    let instance = info.get_fullname().to_owned();
    let addresses = info.get_addresses();
    let ip = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().next());

    match ip {
        Some(ip) => BrowseEvent::Resolved {
            instance,
            address: ServiceAddress::new(ip.to_string(), info.get_port()),
        },
        None => BrowseEvent::Failed {
            instance: Some(instance),
            reason: "resolved without an address".to_owned(),
        },
    }
}
