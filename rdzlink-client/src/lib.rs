//! Async link to an rdz TTGO radiosonde station.
//!
//! Finds the station on the local network, keeps a newline-delimited JSON
//! connection to it, feeds it the host's GPS position and reports every
//! station message and status change to the application.
//!
//! [`LinkCoordinator`] is the entry point; [`DiscoveryService`] and
//! [`StationLink`] can also be used on their own.

pub mod browser;
mod connection;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod event;
pub mod link;
pub mod mdns;
#[cfg(test)]
mod mock;
pub mod position;
pub mod state;
pub mod stream;

pub use browser::{BrowseEvent, ExternalBrowser, ExternalBrowserHandle, ServiceBrowser};
pub use coordinator::LinkCoordinator;
pub use discovery::{DiscoveryEvent, DiscoveryService};
pub use error::{ClientError, Result};
pub use event::{DiscoveryStatus, Event, Failure, FailureKind, LinkStatus};
pub use link::StationLink;
pub use mdns::MdnsBrowser;
pub use position::{PositionFeed, PositionSource};
pub use state::{ConnectionState, DiscoveryConfig, LinkConfig, LinkSession, StationConfig};
pub use stream::EventReceiver;

pub use rdzlink_rs_protocol::{DiscoveryMode, PositionFix, ServiceAddress, StationMessage};
