use std::time::Duration;

use rdzlink_rs_protocol::{PositionFix, ServiceAddress};

/// Station link connection state machine.
///
/// Transitions: `Idle` → `Connecting` → `Connected` → `Disconnecting` → `Idle`,
/// plus `Connecting`/`Connected` → `Idle` directly on failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no attempt in flight.
    #[default]
    Idle,
    /// TCP connect in progress.
    Connecting,
    /// Socket open; receive loop running.
    Connected,
    /// Tearing down the socket and receive loop.
    Disconnecting,
}

impl ConnectionState {
    /// Returns the state name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
        }
    }

    /// Whether a socket exists or is being established.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Configuration for [`StationLink`](crate::StationLink).
#[derive(Clone, Debug)]
pub struct StationConfig {
    /// Timeout for the TCP connection attempt. Default: 10 seconds.
    pub connect_timeout: Duration,
    /// Timeout for writing one message. Default: 5 seconds.
    pub write_timeout: Duration,
    /// Timeout for a single read. `None` waits indefinitely and leaves dead
    /// peer detection to liveness writes. Default: `None`.
    pub read_timeout: Option<Duration>,
    /// Longest accepted line in bytes, excluding the terminator. Longer
    /// lines are skipped and reported as decode failures. Default: 64 KiB.
    pub max_line_length: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            read_timeout: None,
            max_line_length: 64 * 1024,
        }
    }
}

/// Configuration for [`DiscoveryService`](crate::DiscoveryService).
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// DNS-SD service type the station advertises. Default: `"_jsonrdz._tcp.local."`.
    pub service_type: String,
    /// How long a found instance may take to resolve before it is reported
    /// as a discovery failure. Default: 5 seconds.
    pub resolve_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_jsonrdz._tcp.local.".to_owned(),
            resolve_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for [`LinkCoordinator`](crate::LinkCoordinator).
#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub station: StationConfig,
    pub discovery: DiscoveryConfig,
    /// Interval between liveness messages while connected. Default: 5 seconds.
    pub liveness_interval: Duration,
    /// Re-invoke `connect` on a liveness tick when the link is idle but a
    /// target address is known. Default: `true`.
    pub reconnect_on_liveness: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            station: StationConfig::default(),
            discovery: DiscoveryConfig::default(),
            liveness_interval: Duration::from_secs(5),
            reconnect_on_liveness: true,
        }
    }
}

/// The coordinator's record of the currently targeted station.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkSession {
    /// Address the coordinator is (or wants to be) connected to.
    pub address: ServiceAddress,
    /// Link state as of the last event the coordinator processed.
    pub state: ConnectionState,
    /// Last fix forwarded while the link was connected.
    pub last_fix_sent: Option<PositionFix>,
}
