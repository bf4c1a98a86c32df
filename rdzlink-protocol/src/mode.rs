use crate::error::{ProtocolError, Result};

/// Mode tag accepted by the manual discovery override.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiscoveryMode {
    /// An address is available; connect to it.
    Found,
    /// The station went away; drop the connection.
    Lost,
}

impl DiscoveryMode {
    /// Parse from string (case-insensitive, surrounding whitespace ignored).
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "found" => Ok(Self::Found),
            "lost" => Ok(Self::Lost),
            _ => Err(ProtocolError::InvalidMode(s.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::Lost => "lost",
        }
    }
}
