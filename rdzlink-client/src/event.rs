//! Events delivered to the application shell.

use std::fmt;

use rdzlink_rs_protocol::{ServiceAddress, StationMessage};

/// Everything the link reports upward, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A JSON object received from the station.
    Message(StationMessage),
    /// A connection state change.
    Link(LinkStatus),
    /// A discovery result.
    Discovery(DiscoveryStatus),
    /// A non-fatal failure somewhere in the subsystem.
    Failure(Failure),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting(ServiceAddress),
    Connected(ServiceAddress),
    Disconnected(ServiceAddress),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// A station address became available (or replaced the previous one).
    Found(ServiceAddress),
    /// The station went away. `None` when no address was active.
    Lost(Option<ServiceAddress>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A service instance could not be resolved; browsing continues.
    Discovery,
    /// The socket could not be established.
    Connect,
    /// A write failed while connected; the link drops to idle.
    Send,
    /// `send` was called while the link was not connected.
    NotConnected,
    /// A received line was not a JSON object; the line is skipped.
    Decode,
    /// The station closed the socket or a read failed.
    ConnectionLost,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Connect => "connect",
            Self::Send => "send",
            Self::NotConnected => "not-connected",
            Self::Decode => "decode",
            Self::ConnectionLost => "connection-lost",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub address: Option<ServiceAddress>,
    pub detail: String,
}

impl Failure {
    pub fn new(
        kind: FailureKind,
        address: Option<ServiceAddress>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            address,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} ({address}): {}", self.kind.as_str(), self.detail),
            None => write!(f, "{}: {}", self.kind.as_str(), self.detail),
        }
    }
}
