use rdzlink_rs_protocol::{DiscoveryMode, PositionFix, ServiceAddress};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::browser::ServiceBrowser;
use crate::discovery::{DiscoveryEvent, DiscoveryService, parse_override};
use crate::error::{ClientError, Result};
use crate::event::{DiscoveryStatus, Event};
use crate::link::StationLink;
use crate::position::PositionSource;
use crate::state::{ConnectionState, LinkConfig, LinkSession};
use crate::stream::EventReceiver;

enum CoordinatorCommand {
    Start,
    Stop,
    CloseConnection,
    Override {
        mode: DiscoveryMode,
        address: Option<ServiceAddress>,
    },
}

/// Top-level controller joining discovery, the station link and the
/// position source.
///
/// Owns one [`DiscoveryService`] and one [`StationLink`]. Every station
/// message, link status change, discovery change and failure is delivered
/// on the [`EventReceiver`] returned by [`spawn`](Self::spawn).
///
/// # Example
///
/// ```no_run
/// use rdzlink_rs_client::{LinkConfig, LinkCoordinator, MdnsBrowser, PositionFeed};
///
/// # async fn example() -> rdzlink_rs_client::Result<()> {
/// let feed = PositionFeed::default();
/// let (coordinator, mut events) =
///     LinkCoordinator::spawn(LinkConfig::default(), MdnsBrowser::new(), feed.clone());
/// coordinator.start()?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct LinkCoordinator {
    commands: mpsc::UnboundedSender<CoordinatorCommand>,
    running: watch::Receiver<bool>,
    session: watch::Receiver<Option<LinkSession>>,
    task: JoinHandle<()>,
}

impl LinkCoordinator {
    /// Spawn the coordinator and its components. Nothing runs until
    /// [`start`](Self::start).
    pub fn spawn<B, P>(config: LinkConfig, browser: B, positions: P) -> (Self, EventReceiver)
    where
        B: ServiceBrowser,
        P: PositionSource,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (running_tx, running_rx) = watch::channel(false);
        let (session_tx, session_rx) = watch::channel(None);

        let discovery = DiscoveryService::spawn(browser, config.discovery.clone(), discovery_tx);
        let link = StationLink::spawn(config.station.clone(), link_tx);

        let worker = CoordinatorWorker {
            config,
            positions,
            commands: commands_rx,
            events: events_tx,
            discovery,
            discovery_rx,
            link,
            link_rx,
            fixes: None,
            liveness: None,
            target: None,
            last_fix: None,
            pending_stops: 0,
            running: running_tx,
            session: session_tx,
        };

        let coordinator = Self {
            commands: commands_tx,
            running: running_rx,
            session: session_rx,
            task: tokio::spawn(worker.run()),
        };
        (coordinator, EventReceiver::new(events_rx))
    }

    /// Start discovery, subscribe to positions and start the liveness timer.
    /// A no-op while running.
    pub fn start(&self) -> Result<()> {
        self.command(CoordinatorCommand::Start)
    }

    /// Stop discovery, disconnect the link and unsubscribe from positions.
    /// Safe to call at any time.
    pub fn stop(&self) -> Result<()> {
        self.command(CoordinatorCommand::Stop)
    }

    /// Drop the current connection but keep the target address.
    ///
    /// The link comes back on the next liveness tick (when
    /// [`LinkConfig::reconnect_on_liveness`] is set) or the next "found".
    pub fn close_connection(&self) -> Result<()> {
        self.command(CoordinatorCommand::CloseConnection)
    }

    /// Manual discovery override: `mode` is `found` or `lost`, `address` is
    /// `host[:port]`. Malformed arguments are rejected here.
    ///
    /// Repeating a "found" for the current address reconnects an idle link.
    /// An address given before [`start`](Self::start) is connected to once
    /// started.
    pub fn update_discovery(&self, mode: &str, address: &str) -> Result<()> {
        let (mode, address) = parse_override(mode, address)?;
        self.command(CoordinatorCommand::Override { mode, address })
    }

    /// Whether [`start`](Self::start) has taken effect and no
    /// [`stop`](Self::stop) has followed.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Current target and link state, `None` when there is no target.
    pub fn session(&self) -> Option<LinkSession> {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<LinkSession>> {
        self.session.clone()
    }

    pub fn watch_running(&self) -> watch::Receiver<bool> {
        self.running.clone()
    }

    /// Stop everything and wait for all tasks to finish. Events produced
    /// while stopping are still delivered before the event channel ends.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "coordinator task failed");
        }
    }

    fn command(&self, command: CoordinatorCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Closed("link coordinator"))
    }
}

struct CoordinatorWorker<P> {
    config: LinkConfig,
    positions: P,
    commands: mpsc::UnboundedReceiver<CoordinatorCommand>,
    events: mpsc::UnboundedSender<Event>,
    discovery: DiscoveryService,
    discovery_rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
    link: StationLink,
    link_rx: mpsc::UnboundedReceiver<Event>,
    fixes: Option<broadcast::Receiver<PositionFix>>,
    liveness: Option<Interval>,
    target: Option<ServiceAddress>,
    last_fix: Option<PositionFix>,
    /// Discovery stops not yet acknowledged. Found/lost events received
    /// meanwhile come from the previous browse and are dropped.
    pending_stops: usize,
    running: watch::Sender<bool>,
    session: watch::Sender<Option<LinkSession>>,
}

impl<P: PositionSource> CoordinatorWorker<P> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.discovery_rx.recv() => self.handle_discovery(event),
                Some(event) = self.link_rx.recv() => self.emit(event),
                fix = next_fix(&mut self.fixes) => self.handle_fix(fix),
                _ = next_tick(&mut self.liveness) => self.handle_tick(),
            }
            self.publish_session();
        }

        self.stop();
        self.publish_session();

        let Self {
            discovery,
            link,
            mut link_rx,
            mut discovery_rx,
            events,
            ..
        } = self;
        discovery.shutdown().await;
        link.shutdown().await;

        // Status changes produced while stopping
        while let Ok(event) = link_rx.try_recv() {
            let _ = events.send(event);
        }
        while let Ok(event) = discovery_rx.try_recv() {
            if let DiscoveryEvent::Failed(failure) = event {
                let _ = events.send(Event::Failure(failure));
            }
        }
        debug!("coordinator stopped");
    }

    fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Start => self.start(),
            CoordinatorCommand::Stop => self.stop(),
            CoordinatorCommand::CloseConnection => {
                info!(target_address = ?self.target, "closing connection, keeping target");
                report(self.link.disconnect());
            }
            CoordinatorCommand::Override { mode, address } => {
                report(self.discovery.override_address(mode, address));
            }
        }
    }

    fn start(&mut self) {
        if *self.running.borrow() {
            debug!("already running");
            return;
        }
        info!("starting");
        report(self.discovery.start());
        self.fixes = Some(self.positions.subscribe());

        let period = self.config.liveness_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.liveness = Some(interval);

        self.running.send_replace(true);
    }

    fn stop(&mut self) {
        if !*self.running.borrow() && self.target.is_none() {
            return;
        }
        info!("stopping");
        if self.discovery.stop().is_ok() {
            self.pending_stops += 1;
        }
        report(self.link.disconnect());
        self.fixes = None;
        self.liveness = None;
        self.target = None;
        self.last_fix = None;
        self.running.send_replace(false);
    }

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        if self.pending_stops > 0
            && matches!(event, DiscoveryEvent::Found(_) | DiscoveryEvent::Lost(_))
        {
            trace!(?event, "dropping discovery event from before stop");
            return;
        }
        match event {
            DiscoveryEvent::Found(address) => {
                self.emit(Event::Discovery(DiscoveryStatus::Found(address.clone())));
                if !*self.running.borrow() {
                    debug!(%address, "found while stopped, not connecting");
                    return;
                }
                if self.target.as_ref() != Some(&address) {
                    info!(%address, previous = ?self.target, "new target");
                    self.last_fix = None;
                }
                self.target = Some(address.clone());
                report(self.link.connect(address));
            }
            DiscoveryEvent::Lost(address) => {
                self.emit(Event::Discovery(DiscoveryStatus::Lost(address.clone())));
                let is_target = match (&address, &self.target) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(lost), Some(target)) => lost == target,
                };
                if is_target {
                    info!(address = ?self.target, "target lost, disconnecting");
                    self.target = None;
                    self.last_fix = None;
                    report(self.link.disconnect());
                }
            }
            DiscoveryEvent::Failed(failure) => self.emit(Event::Failure(failure)),
            DiscoveryEvent::Stopped => {
                self.pending_stops = self.pending_stops.saturating_sub(1);
            }
        }
    }

    fn handle_fix(&mut self, fix: std::result::Result<PositionFix, RecvError>) {
        match fix {
            Ok(fix) => {
                report(self.link.send_position(fix));
                if self.link.state() == ConnectionState::Connected {
                    self.last_fix = Some(fix);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "position subscriber lagged, skipping stale fixes");
            }
            Err(RecvError::Closed) => {
                debug!("position source closed");
                self.fixes = None;
            }
        }
    }

    fn handle_tick(&mut self) {
        match self.link.state() {
            ConnectionState::Connected => report(self.link.send_liveness()),
            ConnectionState::Idle if self.config.reconnect_on_liveness => {
                if let Some(address) = self.target.clone() {
                    debug!(%address, "link idle, reconnecting");
                    report(self.link.connect(address));
                }
            }
            state => trace!(state = state.as_str(), "liveness tick skipped"),
        }
    }

    fn publish_session(&self) {
        let session = self.target.as_ref().map(|address| LinkSession {
            address: address.clone(),
            state: self.link.state(),
            last_fix_sent: self.last_fix,
        });
        self.session.send_if_modified(|current| {
            if *current == session {
                return false;
            }
            *current = session;
            true
        });
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

/// Component commands only fail once the component's task is gone, which
/// only happens while shutting down.
fn report(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "component command not delivered");
    }
}

async fn next_fix(
    fixes: &mut Option<broadcast::Receiver<PositionFix>>,
) -> std::result::Result<PositionFix, RecvError> {
    match fixes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(liveness: &mut Option<Interval>) {
    match liveness {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
