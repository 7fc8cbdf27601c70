//! Destination addresses for outbound dials
//!
//! Both listeners hand the router a [`TargetAddr`]: either a literal
//! socket address or an unresolved `host:port` pair. Keeping the
//! hostname unresolved matters for proxied connections, where name
//! resolution happens at the tunnel exit rather than locally.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A connection destination, resolved or not
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetAddr {
    /// Literal IP address and port
    Ip(SocketAddr),
    /// Hostname and port, resolved at dial time (or at the tunnel exit)
    Domain(String, u16),
}

impl TargetAddr {
    /// Parse an authority string (`host:port`) as sent in HTTP CONNECT
    ///
    /// Accepts `example.com:443`, `192.0.2.1:80`, and bracketed IPv6
    /// `[2001:db8::1]:443`. Hostnames are lowercased.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidTarget` when the port is missing
    /// or unparseable, or the host is empty or not a valid hostname.
    pub fn parse(authority: &str) -> Result<Self, ProtocolError> {
        let authority = authority.trim();

        // Bracketed IPv6: [::1]:443
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, port_part) = rest
                .split_once(']')
                .ok_or_else(|| ProtocolError::invalid_target(authority))?;
            let port = port_part
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| ProtocolError::invalid_target(authority))?;
            let ip: IpAddr = host
                .parse()
                .map_err(|_| ProtocolError::invalid_target(authority))?;
            return Ok(Self::Ip(SocketAddr::new(ip, port)));
        }

        let (host, port_part) = authority
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::invalid_target(authority))?;
        let port = port_part
            .parse::<u16>()
            .map_err(|_| ProtocolError::invalid_target(authority))?;

        Self::from_host_port(host, port)
    }

    /// Build a target from an already-split host and port
    ///
    /// An IP literal becomes [`TargetAddr::Ip`]; anything else must be
    /// a valid hostname.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidTarget` for empty or malformed
    /// hostnames.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Self::Ip(SocketAddr::new(ip, port)));
        }
        if !is_valid_hostname(host) {
            return Err(ProtocolError::invalid_target(format!("{host}:{port}")));
        }
        Ok(Self::Domain(host.to_ascii_lowercase(), port))
    }

    /// Hostname or IP as a string, used for rule matching and stats keys
    #[must_use]
    pub fn host(&self) -> String {
        match self {
            Self::Ip(addr) => addr.ip().to_string(),
            Self::Domain(host, _) => host.clone(),
        }
    }

    /// The unresolved domain name, if this target carries one
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Ip(_) => None,
            Self::Domain(host, _) => Some(host),
        }
    }

    /// Destination port
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }

    /// Whether this target needs name resolution before a direct dial
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(..))
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

/// Validate hostname according to RFC 1123
fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    // Must be ASCII and not contain null bytes
    if !hostname.is_ascii() || hostname.contains('\0') {
        return false;
    }

    for label in hostname.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
    }

    true
}
