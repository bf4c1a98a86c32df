//! Wire types for the rdz TTGO station link.
//!
//! This crate provides the I/O-free layer shared by the client: station
//! addresses, GPS position fixes, and the newline-delimited JSON messages
//! exchanged with the station.

pub mod address;
pub mod error;
pub mod message;
pub mod mode;
pub mod position;

pub use address::{DEFAULT_PORT, ServiceAddress};
pub use error::{ProtocolError, Result};
pub use message::{OutgoingMessage, StationMessage};
pub use mode::DiscoveryMode;
pub use position::PositionFix;
