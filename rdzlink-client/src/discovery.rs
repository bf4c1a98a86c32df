use std::collections::HashMap;

use rdzlink_rs_protocol::{DiscoveryMode, ServiceAddress};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::browser::{BrowseEvent, ServiceBrowser};
use crate::error::{ClientError, Result};
use crate::event::{Failure, FailureKind};
use crate::state::DiscoveryConfig;

/// Instance name used for addresses supplied through the manual override.
pub const MANUAL_INSTANCE: &str = "manual";

/// Address changes reported by [`DiscoveryService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A usable station address, superseding any previous one.
    Found(ServiceAddress),
    /// The active station went away.
    Lost(Option<ServiceAddress>),
    /// Resolution or backend failure; browsing continues.
    Failed(Failure),
    /// A stop took effect. Events sent before this one belong to the
    /// previous browse.
    Stopped,
}

enum DiscoveryCommand {
    Start,
    Stop,
    Override {
        mode: DiscoveryMode,
        address: Option<ServiceAddress>,
    },
}

/// Parse the manual override arguments.
///
/// `found` requires an address; for `lost` the address is optional and
/// narrows the loss to that address.
pub fn parse_override(mode: &str, address: &str) -> Result<(DiscoveryMode, Option<ServiceAddress>)> {
    let mode = DiscoveryMode::parse(mode)?;
    let address = match mode {
        DiscoveryMode::Found => Some(ServiceAddress::parse(address)?),
        DiscoveryMode::Lost if address.trim().is_empty() => None,
        DiscoveryMode::Lost => Some(ServiceAddress::parse(address)?),
    };
    Ok((mode, address))
}

/// Browses for the station service and reports the address to use.
///
/// When several instances are advertised, the most recently found one that
/// has resolved wins. An older instance resolving later is ignored while a
/// newer one is active.
pub struct DiscoveryService {
    commands: mpsc::UnboundedSender<DiscoveryCommand>,
    task: JoinHandle<()>,
}

impl DiscoveryService {
    /// Spawn the discovery task. Browsing does not begin until [`start`](Self::start).
    pub fn spawn<B: ServiceBrowser>(
        browser: B,
        config: DiscoveryConfig,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let worker = DiscoveryWorker {
            browser,
            config,
            commands: commands_rx,
            events,
            browse: None,
            instances: HashMap::new(),
            active: None,
            next_seq: 0,
        };
        Self {
            commands: commands_tx,
            task: tokio::spawn(worker.run()),
        }
    }

    /// Begin browsing. A no-op while already browsing.
    ///
    /// An address set through the override while stopped is reported
    /// again as found.
    pub fn start(&self) -> Result<()> {
        self.command(DiscoveryCommand::Start)
    }

    /// Stop browsing and forget all instances. Safe when not running.
    /// Always answered with [`DiscoveryEvent::Stopped`].
    pub fn stop(&self) -> Result<()> {
        self.command(DiscoveryCommand::Stop)
    }

    /// Force an address (or its loss) as if it had been discovered.
    ///
    /// A forced "found" is always reported, even for the address that is
    /// already active.
    pub fn update_discovery(&self, mode: &str, address: &str) -> Result<()> {
        let (mode, address) = parse_override(mode, address)?;
        self.override_address(mode, address)
    }

    pub fn override_address(
        &self,
        mode: DiscoveryMode,
        address: Option<ServiceAddress>,
    ) -> Result<()> {
        self.command(DiscoveryCommand::Override { mode, address })
    }

    /// Stop browsing and wait for the discovery task to finish.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "discovery task failed");
        }
    }

    fn command(&self, command: DiscoveryCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Closed("discovery service"))
    }
}

struct Instance {
    seq: u64,
    found_at: Instant,
    address: Option<ServiceAddress>,
    failed: bool,
}

struct DiscoveryWorker<B> {
    browser: B,
    config: DiscoveryConfig,
    commands: mpsc::UnboundedReceiver<DiscoveryCommand>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    browse: Option<mpsc::UnboundedReceiver<BrowseEvent>>,
    instances: HashMap<String, Instance>,
    /// Active instance name and the address last reported for it.
    active: Option<(String, ServiceAddress)>,
    next_seq: u64,
}

impl<B: ServiceBrowser> DiscoveryWorker<B> {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_browse_event(&mut self.browse) => match event {
                    Some(event) => self.handle_browse(event),
                    None => {
                        warn!("browser channel closed");
                        self.browse = None;
                    }
                },
                _ = sleep_until(deadline) => self.expire_unresolved(),
            }
        }

        self.stop();
        debug!("discovery stopped");
    }

    fn handle_command(&mut self, command: DiscoveryCommand) {
        match command {
            DiscoveryCommand::Start => self.start(),
            DiscoveryCommand::Stop => self.stop(),
            DiscoveryCommand::Override { mode, address } => self.apply_override(mode, address),
        }
    }

    fn start(&mut self) {
        if self.browse.is_some() {
            debug!("already browsing");
            return;
        }
        match self.browser.browse(&self.config.service_type) {
            Ok(rx) => {
                info!(service_type = %self.config.service_type, "browsing");
                self.browse = Some(rx);
            }
            Err(e) => {
                warn!(error = %e, "browse failed to start");
                self.emit(DiscoveryEvent::Failed(Failure::new(
                    FailureKind::Discovery,
                    None,
                    e.to_string(),
                )));
            }
        }

        if let Some((name, address)) = &self.active {
            debug!(instance = %name, %address, "reporting address set while stopped");
            self.emit(DiscoveryEvent::Found(address.clone()));
        }
    }

    fn stop(&mut self) {
        if self.browse.take().is_some() {
            if let Err(e) = self.browser.stop_browse(&self.config.service_type) {
                warn!(error = %e, "stop_browse failed");
            }
            info!("browsing stopped");
        }
        self.instances.clear();
        self.active = None;
        self.emit(DiscoveryEvent::Stopped);
    }

    fn handle_browse(&mut self, event: BrowseEvent) {
        trace!(?event, "browse event");
        match event {
            BrowseEvent::Found { instance } => {
                if !self.instances.contains_key(&instance) {
                    debug!(%instance, "instance found");
                    let entry = self.new_instance(None);
                    self.instances.insert(instance, entry);
                }
            }
            BrowseEvent::Resolved { instance, address } => {
                debug!(%instance, %address, "instance resolved");
                if !self.instances.contains_key(&instance) {
                    let entry = self.new_instance(None);
                    self.instances.insert(instance.clone(), entry);
                }
                if let Some(entry) = self.instances.get_mut(&instance) {
                    entry.address = Some(address);
                    entry.failed = false;
                }
                self.consider(&instance);
            }
            BrowseEvent::Removed { instance } => {
                debug!(%instance, "instance removed");
                self.instances.remove(&instance);
                if self.active.as_ref().is_some_and(|(name, _)| *name == instance) {
                    let (_, address) = self.active.take().unzip();
                    self.emit(DiscoveryEvent::Lost(address));
                    self.promote();
                }
            }
            BrowseEvent::Failed { instance, reason } => {
                if let Some(entry) = instance.as_ref().and_then(|i| self.instances.get_mut(i)) {
                    entry.failed = true;
                }
                warn!(instance = ?instance, %reason, "resolution failed");
                self.emit(DiscoveryEvent::Failed(Failure::new(
                    FailureKind::Discovery,
                    None,
                    match instance {
                        Some(instance) => format!("{instance}: {reason}"),
                        None => reason,
                    },
                )));
            }
        }
    }

    fn apply_override(&mut self, mode: DiscoveryMode, address: Option<ServiceAddress>) {
        info!(mode = mode.as_str(), address = ?address, "discovery override");
        match (mode, address) {
            (DiscoveryMode::Found, Some(address)) => {
                let entry = self.new_instance(Some(address));
                self.instances.insert(MANUAL_INSTANCE.to_owned(), entry);
                self.consider(MANUAL_INSTANCE);
            }
            (DiscoveryMode::Found, None) => {}
            (DiscoveryMode::Lost, Some(address)) => {
                self.instances
                    .retain(|_, entry| entry.address.as_ref() != Some(&address));
                if self.active.as_ref().is_some_and(|(_, a)| *a == address) {
                    self.active = None;
                    self.emit(DiscoveryEvent::Lost(Some(address)));
                }
            }
            (DiscoveryMode::Lost, None) => {
                let (name, address) = self.active.take().unzip();
                if let Some(name) = name {
                    self.instances.remove(&name);
                }
                self.emit(DiscoveryEvent::Lost(address));
            }
        }
    }

    /// Make `instance` active if it has an address and is not older than
    /// the currently active instance. A fresh resolution of the active
    /// instance is reported again so the caller can re-establish its link.
    fn consider(&mut self, instance: &str) {
        let Some(entry) = self.instances.get(instance) else {
            return;
        };
        let Some(address) = entry.address.clone() else {
            return;
        };

        if let Some((name, _)) = &self.active
            && name != instance
            && self
                .instances
                .get(name)
                .is_some_and(|active| active.seq > entry.seq)
        {
            debug!(%instance, active = %name, "older instance resolved, ignoring");
            return;
        }

        info!(%instance, %address, "station found");
        self.active = Some((instance.to_owned(), address.clone()));
        self.emit(DiscoveryEvent::Found(address));
    }

    /// After losing the active instance, fall back to the newest resolved one.
    fn promote(&mut self) {
        let newest = self
            .instances
            .iter()
            .filter(|(_, entry)| entry.address.is_some())
            .max_by_key(|(_, entry)| entry.seq)
            .map(|(name, _)| name.clone());
        if let Some(name) = newest {
            self.consider(&name);
        }
    }

    fn new_instance(&mut self, address: Option<ServiceAddress>) -> Instance {
        self.next_seq += 1;
        Instance {
            seq: self.next_seq,
            found_at: Instant::now(),
            address,
            failed: false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.instances
            .values()
            .filter(|entry| entry.address.is_none() && !entry.failed)
            .map(|entry| entry.found_at + self.config.resolve_timeout)
            .min()
    }

    fn expire_unresolved(&mut self) {
        let now = Instant::now();
        let timeout = self.config.resolve_timeout;
        let mut expired = Vec::new();
        for (name, entry) in &mut self.instances {
            if entry.address.is_none() && !entry.failed && entry.found_at + timeout <= now {
                entry.failed = true;
                expired.push(name.clone());
            }
        }
        for name in expired {
            warn!(instance = %name, ?timeout, "resolution timed out");
            self.emit(DiscoveryEvent::Failed(Failure::new(
                FailureKind::Discovery,
                None,
                format!("{name}: not resolved within {timeout:?}"),
            )));
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        if self.events.send(event).is_err() {
            trace!("discovery event receiver dropped");
        }
    }
}

async fn next_browse_event(
    browse: &mut Option<mpsc::UnboundedReceiver<BrowseEvent>>,
) -> Option<BrowseEvent> {
    match browse {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
