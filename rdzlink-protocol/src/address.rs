use std::fmt;

use crate::error::{ProtocolError, Result};

/// Port the station's JSON service listens on when none is given.
pub const DEFAULT_PORT: u16 = 14570;

/// Resolved network address of a station service.
///
/// Immutable once constructed; compared by value to detect address changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    host: String,
    port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, `[v6]:port`, a bare host, or a bare IPv6 literal.
    ///
    /// A missing port falls back to [`DEFAULT_PORT`].
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProtocolError::InvalidAddress("empty address".into()));
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ProtocolError::InvalidAddress(format!("unterminated IPv6 literal: {s:?}"))
            })?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(ProtocolError::InvalidAddress(format!(
                            "unexpected text after IPv6 literal: {s:?}"
                        )));
                    }
                },
            }
        } else {
            match s.matches(':').count() {
                0 => (s, None),
                1 => {
                    let (host, port) = s.split_once(':').unwrap_or((s, ""));
                    (host, Some(port))
                }
                // Unbracketed IPv6 literal, no port possible
                _ => (s, None),
            }
        };

        if host.is_empty() {
            return Err(ProtocolError::InvalidAddress(format!("missing host: {s:?}")));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(p) => parse_port(s, p)?,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host/port pair suitable for `TcpStream::connect`.
    pub fn as_pair(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

fn parse_port(address: &str, port: &str) -> Result<u16> {
    let value: u16 = port.parse().map_err(|_| ProtocolError::InvalidPort {
        address: address.to_owned(),
        reason: format!("{port:?} is not a number in 1..=65535"),
    })?;
    if value == 0 {
        return Err(ProtocolError::InvalidPort {
            address: address.to_owned(),
            reason: "port 0 is not connectable".into(),
        });
    }
    Ok(value)
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
