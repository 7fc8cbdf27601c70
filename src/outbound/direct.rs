//! Direct outbound implementation
//!
//! Dials the destination straight from this host. Domain targets are
//! resolved with the system resolver and each returned address is
//! tried in order until one accepts; the configured timeout bounds the
//! whole attempt, resolution included.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use super::target::TargetAddr;
use super::traits::{Outbound, OutboundConnection};
use crate::error::OutboundError;

/// Idle time before the first keepalive probe
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);
/// Interval between keepalive probes
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Direct outbound - connects straight to the destination
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectOutbound;

impl DirectOutbound {
    /// Create a new direct outbound
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolve a target to candidate socket addresses
    async fn resolve(target: &TargetAddr) -> Result<Vec<SocketAddr>, OutboundError> {
        match target {
            TargetAddr::Ip(addr) => Ok(vec![*addr]),
            TargetAddr::Domain(host, port) => {
                let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| OutboundError::resolve(host, e.to_string()))?
                    .collect();
                if addrs.is_empty() {
                    return Err(OutboundError::resolve(host, "no addresses returned"));
                }
                Ok(addrs)
            }
        }
    }

    /// Connect to a single resolved address
    ///
    /// Uses a non-blocking socket so the dial can be awaited under a
    /// timeout: initiate the connect, wait for writability, then check
    /// `SO_ERROR` for the real outcome. The SOCKS5 outbound reuses
    /// this to reach the tunnel entry.
    pub(crate) async fn connect_once(addr: SocketAddr) -> Result<TcpStream, OutboundError> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| OutboundError::connection_failed(addr.to_string(), e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| OutboundError::SocketOption {
                option: "O_NONBLOCK".into(),
                reason: e.to_string(),
            })?;

        // Keepalive catches dead peers on long-lived relays
        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_TIME)
            .with_interval(KEEPALIVE_INTERVAL);
        socket
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| OutboundError::SocketOption {
                option: "TCP_KEEPALIVE".into(),
                reason: e.to_string(),
            })?;

        // EINPROGRESS is the expected result for a non-blocking connect
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => {
                return Err(OutboundError::connection_failed(
                    addr.to_string(),
                    e.to_string(),
                ));
            }
        }

        // Hand the fd to tokio right away so it is closed on any error path
        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream)
            .map_err(|e| OutboundError::connection_failed(addr.to_string(), e.to_string()))?;

        stream
            .writable()
            .await
            .map_err(|e| OutboundError::connection_failed(addr.to_string(), e.to_string()))?;

        // Writable fires for both success and failure; SO_ERROR tells which
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                return Err(OutboundError::connection_failed(
                    addr.to_string(),
                    e.to_string(),
                ));
            }
        }

        // Lower latency for interactive protocols
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(stream)
    }

    /// Resolve and dial, trying each address in order
    async fn dial(target: &TargetAddr) -> Result<OutboundConnection, OutboundError> {
        let addrs = Self::resolve(target).await?;
        let mut last_err = None;

        for addr in addrs {
            match Self::connect_once(addr).await {
                Ok(stream) => {
                    debug!(target = %target, %addr, "direct connection established");
                    return Ok(OutboundConnection::new(stream, addr));
                }
                Err(e) => {
                    debug!(target = %target, %addr, error = %e, "direct dial failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| OutboundError::resolve(target.host(), "no addresses returned")))
    }
}

#[async_trait]
impl Outbound for DirectOutbound {
    async fn connect(
        &self,
        target: &TargetAddr,
        connect_timeout: Duration,
    ) -> Result<OutboundConnection, OutboundError> {
        match timeout(connect_timeout, Self::dial(target)).await {
            Ok(result) => result,
            Err(_) => Err(OutboundError::timeout(
                target.to_string(),
                connect_timeout.as_secs(),
            )),
        }
    }

    fn tag(&self) -> &'static str {
        "direct"
    }
}
