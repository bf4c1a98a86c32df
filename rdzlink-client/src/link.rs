use rdzlink_rs_protocol::{OutgoingMessage, PositionFix, ServiceAddress, StationMessage};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, LineReader, LineWriter};
use crate::error::{ClientError, Result};
use crate::event::{Event, Failure, FailureKind, LinkStatus};
use crate::state::{ConnectionState, StationConfig};

enum LinkCommand {
    Connect(ServiceAddress),
    Disconnect,
    Send {
        message: OutgoingMessage,
        drop_if_idle: bool,
    },
}

/// Results from the connect and receive tasks, tagged with the attempt that
/// produced them so stale results from a torn-down attempt are ignored.
enum Internal {
    Established { attempt: u64, connection: Connection },
    ConnectFailed { attempt: u64, error: ClientError },
    Line { attempt: u64, line: Vec<u8> },
    Oversized { attempt: u64, limit: usize },
    Closed { attempt: u64, error: ClientError },
}

/// Line-oriented JSON link to exactly one station address at a time.
///
/// All socket work happens on a spawned task; the methods on this handle
/// only enqueue commands and never block. Outcomes are reported as
/// [`Event`]s on the channel given to [`spawn`](Self::spawn). The link never
/// reconnects on its own: after a failure it stays [`ConnectionState::Idle`]
/// until `connect` is called again.
pub struct StationLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl StationLink {
    /// Spawn the link task. Requires a Tokio runtime.
    pub fn spawn(config: StationConfig, events: mpsc::UnboundedSender<Event>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let worker = LinkWorker {
            config,
            commands: commands_rx,
            internal_tx,
            internal_rx,
            state: state_tx,
            events,
            address: None,
            attempt: 0,
            writer: None,
            connect_task: None,
            reader_task: None,
        };

        Self {
            commands: commands_tx,
            state: state_rx,
            task: tokio::spawn(worker.run()),
        }
    }

    /// Connect to `address`, replacing any connection to a different address.
    ///
    /// A no-op while already connected or connecting to `address`.
    pub fn connect(&self, address: ServiceAddress) -> Result<()> {
        self.command(LinkCommand::Connect(address))
    }

    /// Close the socket and return to `Idle`. A no-op from `Idle`.
    pub fn disconnect(&self) -> Result<()> {
        self.command(LinkCommand::Disconnect)
    }

    /// Send an arbitrary JSON object.
    ///
    /// While not connected nothing is sent and a
    /// [`FailureKind::NotConnected`] event is reported instead.
    pub fn send(&self, message: Map<String, Value>) -> Result<()> {
        self.command(LinkCommand::Send {
            message: OutgoingMessage::Raw(message),
            drop_if_idle: false,
        })
    }

    /// Send the liveness marker. Dropped silently while not connected.
    pub fn send_liveness(&self) -> Result<()> {
        self.command(LinkCommand::Send {
            message: OutgoingMessage::Alive,
            drop_if_idle: true,
        })
    }

    /// Send a position update. Dropped silently while not connected.
    pub fn send_position(&self, fix: PositionFix) -> Result<()> {
        self.command(LinkCommand::Send {
            message: OutgoingMessage::Position(fix),
            drop_if_idle: true,
        })
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disconnect and wait for the link task to finish.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "station link task failed");
        }
    }

    fn command(&self, command: LinkCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Closed("station link"))
    }
}

struct LinkWorker {
    config: StationConfig,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<Event>,
    address: Option<ServiceAddress>,
    attempt: u64,
    writer: Option<LineWriter>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl LinkWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
            }
        }

        self.teardown(true).await;
        debug!("station link stopped");
    }

    async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Connect(address) => self.connect(address).await,
            LinkCommand::Disconnect => self.teardown(true).await,
            LinkCommand::Send {
                message,
                drop_if_idle,
            } => self.send(message, drop_if_idle).await,
        }
    }

    async fn connect(&mut self, address: ServiceAddress) {
        let state = self.current_state();
        if state.is_active() {
            if self.address.as_ref() == Some(&address) {
                debug!(%address, state = state.as_str(), "already linked, ignoring connect");
                return;
            }
            self.teardown(true).await;
        }

        self.attempt += 1;
        let attempt = self.attempt;
        info!(%address, attempt, "connecting");

        self.address = Some(address.clone());
        self.set_state(ConnectionState::Connecting);
        self.emit(Event::Link(LinkStatus::Connecting(address.clone())));

        let internal = self.internal_tx.clone();
        let config = self.config.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let outcome = match Connection::connect(&address, &config).await {
                Ok(connection) => Internal::Established {
                    attempt,
                    connection,
                },
                Err(error) => Internal::ConnectFailed { attempt, error },
            };
            let _ = internal.send(outcome);
        }));
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Established {
                attempt,
                connection,
            } => {
                if attempt != self.attempt || self.current_state() != ConnectionState::Connecting
                {
                    trace!(attempt, "dropping stale connection");
                    return;
                }
                self.connect_task = None;

                let (reader, writer) = connection.into_split();
                self.writer = Some(writer);
                self.reader_task = Some(tokio::spawn(receive_loop(
                    reader,
                    attempt,
                    self.internal_tx.clone(),
                )));
                self.set_state(ConnectionState::Connected);

                if let Some(address) = self.address.clone() {
                    info!(%address, "connected");
                    self.emit(Event::Link(LinkStatus::Connected(address)));
                }
            }
            Internal::ConnectFailed { attempt, error } => {
                if attempt != self.attempt || self.current_state() != ConnectionState::Connecting
                {
                    return;
                }
                self.connect_task = None;

                let address = self.address.take();
                warn!(address = ?address, error = %error, "connect failed");
                self.set_state(ConnectionState::Idle);
                self.emit(Event::Failure(Failure::new(
                    FailureKind::Connect,
                    address,
                    error.to_string(),
                )));
            }
            Internal::Line { attempt, line } => {
                if attempt == self.attempt && self.current_state() == ConnectionState::Connected {
                    self.handle_line(&line);
                }
            }
            Internal::Oversized { attempt, limit } => {
                if attempt == self.attempt && self.current_state() == ConnectionState::Connected {
                    debug!(limit, "skipping overlong line");
                    self.emit(Event::Failure(Failure::new(
                        FailureKind::Decode,
                        self.address.clone(),
                        format!("line longer than {limit} bytes"),
                    )));
                }
            }
            Internal::Closed { attempt, error } => {
                if attempt != self.attempt || self.current_state() != ConnectionState::Connected {
                    return;
                }
                self.reader_task = None;

                let detail = match error {
                    ClientError::Disconnected => "closed by station".to_owned(),
                    other => other.to_string(),
                };
                warn!(address = ?self.address, %detail, "connection lost");
                self.emit(Event::Failure(Failure::new(
                    FailureKind::ConnectionLost,
                    self.address.clone(),
                    detail,
                )));
                self.teardown(false).await;
            }
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let decoded = std::str::from_utf8(line)
            .map_err(|e| format!("invalid UTF-8: {e}"))
            .and_then(|text| {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                StationMessage::decode_line(text)
                    .map(Some)
                    .map_err(|e| e.to_string())
            });

        match decoded {
            Ok(Some(message)) => {
                trace!(keys = message.len(), "message received");
                self.emit(Event::Message(message));
            }
            Ok(None) => {}
            Err(detail) => {
                debug!(%detail, "skipping undecodable line");
                self.emit(Event::Failure(Failure::new(
                    FailureKind::Decode,
                    self.address.clone(),
                    detail,
                )));
            }
        }
    }

    async fn send(&mut self, message: OutgoingMessage, drop_if_idle: bool) {
        let state = self.current_state();
        if state != ConnectionState::Connected {
            if drop_if_idle {
                trace!(kind = message.kind(), state = state.as_str(), "not connected, dropping");
            } else {
                debug!(kind = message.kind(), state = state.as_str(), "send while not connected");
                self.emit(Event::Failure(Failure::new(
                    FailureKind::NotConnected,
                    self.address.clone(),
                    format!(
                        "cannot send {} message while {}",
                        message.kind(),
                        state.as_str()
                    ),
                )));
            }
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = match message.to_line() {
            Ok(line) => writer.send_line(&line).await,
            Err(e) => Err(ClientError::from(e)),
        };

        if let Err(e) = result {
            warn!(kind = message.kind(), error = %e, "send failed");
            self.emit(Event::Failure(Failure::new(
                FailureKind::Send,
                self.address.clone(),
                e.to_string(),
            )));
            self.teardown(false).await;
        }
    }

    /// Release the socket and any in-flight tasks, ending in `Idle`.
    ///
    /// `graceful` passes through `Disconnecting` (an explicit disconnect);
    /// failures drop straight to `Idle`.
    async fn teardown(&mut self, graceful: bool) {
        if !self.current_state().is_active() {
            return;
        }
        if graceful {
            self.set_state(ConnectionState::Disconnecting);
        }

        // Anything the old attempt still has queued is now stale
        self.attempt += 1;

        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let limit = self.config.write_timeout;
            match tokio::time::timeout(limit, writer.shutdown()).await {
                Ok(Err(e)) => debug!(error = %e, "socket shutdown failed"),
                Err(_) => debug!(timeout = ?limit, "socket shutdown timed out"),
                Ok(Ok(())) => {}
            }
        }

        self.set_state(ConnectionState::Idle);
        if let Some(address) = self.address.take() {
            info!(%address, "disconnected");
            self.emit(Event::Link(LinkStatus::Disconnected(address)));
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!(from = previous.as_str(), to = state.as_str(), "state change");
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

async fn receive_loop(
    mut reader: LineReader,
    attempt: u64,
    internal: mpsc::UnboundedSender<Internal>,
) {
    loop {
        let result = match reader.read_line().await {
            Ok(line) => internal.send(Internal::Line { attempt, line }),
            Err(ClientError::LineTooLong(limit)) => {
                internal.send(Internal::Oversized { attempt, limit })
            }
            Err(error) => {
                let _ = internal.send(Internal::Closed { attempt, error });
                return;
            }
        };
        if result.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStation;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn spawn_link() -> (StationLink, mpsc::UnboundedReceiver<Event>) {
        spawn_link_with(StationConfig::default())
    }

    fn spawn_link_with(config: StationConfig) -> (StationLink, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StationLink::spawn(config, tx), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_no_event(rx: &mut mpsc::UnboundedReceiver<Event>, window: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(window, rx.recv()).await {
            panic!("expected no event, got {event:?}");
        }
    }

    async fn connect_to(
        link: &StationLink,
        rx: &mut mpsc::UnboundedReceiver<Event>,
        address: ServiceAddress,
    ) {
        link.connect(address.clone()).unwrap();
        assert_eq!(
            next_event(rx).await,
            Event::Link(LinkStatus::Connecting(address.clone()))
        );
        assert_eq!(
            next_event(rx).await,
            Event::Link(LinkStatus::Connected(address))
        );
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    async fn wait_for_state(link: &StationLink, state: ConnectionState) {
        let mut watch = link.watch_state();
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    #[tokio::test]
    async fn connect_and_receive_message() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();

        connect_to(&link, &mut rx, station.address()).await;

        station.write("{\"temp\":21.5}\n");
        match next_event(&mut rx).await {
            Event::Message(msg) => assert_eq!(msg.get("temp"), Some(&Value::from(21.5))),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn messages_delivered_in_order() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        station.write("{\"n\":1}\n{\"n\":2}\r\n\n{\"n\":3}\n");
        for expected in 1..=3 {
            match next_event(&mut rx).await {
                Event::Message(msg) => assert_eq!(msg.get("n"), Some(&Value::from(expected))),
                other => panic!("expected message {expected}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn decode_failure_keeps_connection() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        station.write("this is not json\n{\"sonde\":\"S1\"}\n");

        match next_event(&mut rx).await {
            Event::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Decode);
                assert_eq!(f.address, Some(station.address()));
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
        match next_event(&mut rx).await {
            Event::Message(msg) => assert_eq!(msg.get("sonde"), Some(&Value::from("S1"))),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decode_failure() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        station.write_bytes(b"{\"a\":\"\xff\xfe\"}\n{\"ok\":true}\n");

        match next_event(&mut rx).await {
            Event::Failure(f) => assert_eq!(f.kind, FailureKind::Decode),
            other => panic!("expected decode failure, got {other:?}"),
        }
        match next_event(&mut rx).await {
            Event::Message(msg) => assert_eq!(msg.get("ok"), Some(&Value::Bool(true))),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_position_writes_one_line() {
        let mut station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        link.send_position(PositionFix::new(48.0, 11.0, 500.0, 90.0, 5.0))
            .unwrap();

        let line = station.next_line().await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "gps");
        assert_eq!(value["lat"], 48.0);
        assert_eq!(value["lon"], 11.0);
        assert_eq!(value["alt"], 500.0);
        assert_eq!(value["course"], 90.0);
        assert_eq!(value["acc"], 5.0);
    }

    #[tokio::test]
    async fn send_liveness_and_raw() {
        let mut station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        link.send_liveness().unwrap();
        assert_eq!(station.next_line().await, "{\"type\":\"alive\"}");

        let mut map = Map::new();
        map.insert("cmd".into(), Value::from("status"));
        link.send(map).unwrap();
        assert_eq!(station.next_line().await, "{\"cmd\":\"status\"}");
    }

    #[tokio::test]
    async fn position_while_idle_is_dropped_silently() {
        let (link, mut rx) = spawn_link();

        link.send_position(PositionFix::new(48.0, 11.0, 500.0, 90.0, 5.0))
            .unwrap();
        link.send_liveness().unwrap();

        expect_no_event(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(link.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn send_while_idle_reports_not_connected() {
        let (link, mut rx) = spawn_link();

        link.send(Map::new()).unwrap();

        match next_event(&mut rx).await {
            Event::Failure(f) => assert_eq!(f.kind, FailureKind::NotConnected),
            other => panic!("expected not-connected failure, got {other:?}"),
        }
        assert_eq!(link.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn connect_same_address_is_idempotent() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        link.connect(station.address()).unwrap();
        link.connect(station.address()).unwrap();

        expect_no_event(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(station.accepted(), 1);
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn connect_other_address_replaces_link() {
        let first = MockStation::start().await;
        let second = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, first.address()).await;

        link.connect(second.address()).unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Disconnected(first.address()))
        );
        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Connecting(second.address()))
        );
        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Connected(second.address()))
        );
        first.wait_closed(1).await;
        assert_eq!(second.accepted(), 1);
    }

    #[tokio::test]
    async fn disconnect_from_idle_is_noop() {
        let (link, mut rx) = spawn_link();

        link.disconnect().unwrap();

        expect_no_event(&mut rx, Duration::from_millis(50)).await;
        assert_eq!(link.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn disconnect_from_connected_closes_socket() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        link.disconnect().unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Disconnected(station.address()))
        );
        assert_eq!(link.state(), ConnectionState::Idle);
        station.wait_closed(1).await;
    }

    #[tokio::test]
    async fn disconnect_aborts_pending_connect() {
        let (link, mut rx) = spawn_link();
        let address = ServiceAddress::new("192.0.2.1", 14570);

        link.connect(address.clone()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Connecting(address))
        );

        link.disconnect().unwrap();
        wait_for_state(&link, ConnectionState::Idle).await;

        // Either the abort won or the attempt had already failed; never Connected
        match next_event(&mut rx).await {
            Event::Link(LinkStatus::Disconnected(_)) => {}
            Event::Failure(f) if f.kind == FailureKind::Connect => {}
            other => panic!("unexpected event {other:?}"),
        }
        expect_no_event(&mut rx, Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn connect_failure_goes_idle_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let address = ServiceAddress::new("127.0.0.1", port);

        let (link, mut rx) = spawn_link();
        link.connect(address.clone()).unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Connecting(address.clone()))
        );
        match next_event(&mut rx).await {
            Event::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Connect);
                assert_eq!(f.address, Some(address));
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(link.state(), ConnectionState::Idle);
        expect_no_event(&mut rx, Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn overlong_line_is_decode_failure() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link_with(StationConfig {
            max_line_length: 32,
            ..StationConfig::default()
        });
        connect_to(&link, &mut rx, station.address()).await;

        let long = format!("{{\"pad\":\"{}\"}}\n{{\"ok\":true}}\n", "x".repeat(1000));
        station.write(&long);

        match next_event(&mut rx).await {
            Event::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Decode);
                assert_eq!(f.detail, "line longer than 32 bytes");
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
        match next_event(&mut rx).await {
            Event::Message(msg) => assert_eq!(msg.get("ok"), Some(&Value::Bool(true))),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(link.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn write_failure_drops_to_idle() {
        // A peer that accepts but never reads, so the socket buffers fill up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = ServiceAddress::new("127.0.0.1", listener.local_addr().unwrap().port());
        let (link, mut rx) = spawn_link_with(StationConfig {
            write_timeout: Duration::from_millis(50),
            ..StationConfig::default()
        });
        connect_to(&link, &mut rx, address.clone()).await;
        let (_held, _) = listener.accept().await.unwrap();

        let mut bulk = Map::new();
        bulk.insert("pad".into(), Value::String("x".repeat(4 << 20)));

        let mut attempts = 0;
        let event = loop {
            attempts += 1;
            assert!(attempts <= 64, "socket never blocked");
            link.send(bulk.clone()).unwrap();
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
            {
                break event;
            }
        };

        match event {
            Event::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Send);
                assert_eq!(f.address, Some(address.clone()));
            }
            other => panic!("expected send failure, got {other:?}"),
        }
        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Disconnected(address))
        );
        assert_eq!(link.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn peer_close_reports_connection_lost() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        station.close();

        match next_event(&mut rx).await {
            Event::Failure(f) => assert_eq!(f.kind, FailureKind::ConnectionLost),
            other => panic!("expected connection lost, got {other:?}"),
        }
        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Disconnected(station.address()))
        );
        assert_eq!(link.state(), ConnectionState::Idle);

        // No reconnect of its own
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(station.accepted(), 1);
    }

    #[tokio::test]
    async fn reconnect_after_loss_when_asked() {
        let mut station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        station.close();
        wait_for_state(&link, ConnectionState::Idle).await;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {}

        connect_to(&link, &mut rx, station.address()).await;
        link.send_liveness().unwrap();
        assert_eq!(station.next_line().await, "{\"type\":\"alive\"}");
        assert_eq!(station.accepted(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_socket() {
        let station = MockStation::start().await;
        let (link, mut rx) = spawn_link();
        connect_to(&link, &mut rx, station.address()).await;

        link.shutdown().await;

        assert_eq!(
            next_event(&mut rx).await,
            Event::Link(LinkStatus::Disconnected(station.address()))
        );
        station.wait_closed(1).await;
    }
}
