//! Outbound trait definitions
//!
//! The [`Outbound`] trait is the seam between the router's policy and
//! the two ways a connection can leave this process: a direct dial or
//! a CONNECT through the upstream tunnel. Health tracking lives with
//! the tunnel supervisor and byte accounting with the stats collector,
//! so the trait stays a pure dialer.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::target::TargetAddr;
use crate::error::OutboundError;

/// An established outbound connection
///
/// `remote_addr` is the address this process actually dialed: the
/// resolved destination for direct connections, the tunnel entry for
/// proxied ones.
pub struct OutboundConnection {
    /// The underlying TCP stream
    stream: TcpStream,
    /// Local address of the connection
    local_addr: Option<SocketAddr>,
    /// Address this process dialed
    remote_addr: SocketAddr,
}

impl OutboundConnection {
    /// Wrap an established stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let local_addr = stream.local_addr().ok();
        Self {
            stream,
            local_addr,
            remote_addr,
        }
    }

    /// Get the underlying stream
    #[must_use]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Get mutable reference to the stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Consume and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the local address
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the dialed address
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl std::fmt::Debug for OutboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Core trait for outbound dialers
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Connect to the target through this outbound.
    ///
    /// The timeout bounds the whole dial, name resolution and any
    /// proxy handshake included.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if resolution, the dial, or an upstream
    /// handshake fails or times out.
    async fn connect(
        &self,
        target: &TargetAddr,
        timeout: Duration,
    ) -> Result<OutboundConnection, OutboundError>;

    /// Short tag for logs ("direct", "socks5-tunnel")
    fn tag(&self) -> &'static str;
}
