//! SOCKS5 inbound listener
//!
//! Accepts local SOCKS5 clients and tunnels them through the
//! [`ConnectionRouter`](crate::router::ConnectionRouter). Domain
//! targets are passed through unresolved so that proxied connections
//! resolve at the tunnel exit rather than locally.
//!
//! ```text
//! SOCKS5 client                 smart-proxy
//!       |                            |
//!       v                            v
//! +-------------+           +------------------+
//! | curl, apps  | --SOCKS-> | Socks5ProxyServer|
//! +-------------+           +------------------+
//!                                    |
//!                           +------------------+
//!                           | ConnectionRouter |
//!                           | (rule matching)  |
//!                           +------------------+
//!                              |            |
//!                           direct     upstream relay
//! ```
//!
//! # Protocol Flow
//!
//! 1. Client sends auth method selection; server requires no-auth
//!    (anything else is rejected with method `0xFF`)
//! 2. Client sends a CONNECT request (BIND and UDP ASSOCIATE get
//!    reply `0x07` command-not-supported)
//! 3. Router decides direct / proxy / fallback and dials
//! 4. Server replies: success carries the bound local address; dial
//!    timeout maps to `0x04`, refused to `0x05`, tunnel-down and
//!    everything else to `0x01`
//! 5. Bidirectional data relay begins

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ProtocolError, RouteError};
use crate::outbound::socks5_common::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE, AUTH_METHOD_NO_ACCEPTABLE, CMD_CONNECT,
    REPLY_ADDRESS_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED, REPLY_CONNECTION_REFUSED,
    REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE, REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use crate::outbound::TargetAddr;
use crate::router::ConnectionRouter;

/// SOCKS5 server configuration
#[derive(Debug, Clone)]
pub struct Socks5ServerConfig {
    /// Listen address (e.g., "127.0.0.1:8119")
    pub listen_addr: SocketAddr,
    /// Deadline for completing the greeting and request phases
    pub handshake_timeout: Duration,
}

impl Default for Socks5ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8119),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Statistics for the SOCKS5 server
#[derive(Debug, Default)]
pub struct Socks5ServerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Total connections completed (successfully relayed)
    pub connections_completed: AtomicU64,
    /// Total dial or relay errors after a valid handshake
    pub connection_errors: AtomicU64,
    /// Total handshakes that never produced a valid request
    pub handshake_failures: AtomicU64,
}

impl Socks5ServerStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> Socks5ServerStatsSnapshot {
        Socks5ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_completed: self.connections_completed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of SOCKS5 server statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Socks5ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_completed: u64,
    pub connection_errors: u64,
    pub handshake_failures: u64,
}

/// SOCKS5 inbound server
pub struct Socks5ProxyServer {
    config: Socks5ServerConfig,
    router: Arc<ConnectionRouter>,
    stats: Arc<Socks5ServerStats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    local_addr_tx: watch::Sender<Option<SocketAddr>>,
}

impl Socks5ProxyServer {
    /// Create a new SOCKS5 server
    pub fn new(config: Socks5ServerConfig, router: Arc<ConnectionRouter>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (local_addr_tx, _) = watch::channel(None);
        Self {
            config,
            router,
            stats: Arc::new(Socks5ServerStats::default()),
            shutdown_tx,
            shutdown_rx,
            local_addr_tx,
        }
    }

    /// Get server statistics
    pub fn stats(&self) -> &Arc<Socks5ServerStats> {
        &self.stats
    }

    /// Address the listener is actually bound to
    ///
    /// `None` until [`run`](Self::run) has bound the socket. With a
    /// port-0 listen address this is the only way to learn the port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr_tx.borrow()
    }

    /// Start the SOCKS5 server
    ///
    /// Runs until [`shutdown`](Self::shutdown) is called. Accept errors
    /// are logged and the loop continues; a failed connection never
    /// takes the listener down.
    ///
    /// # Errors
    ///
    /// Returns an error only when the listen socket cannot be bound.
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let _ = self.local_addr_tx.send_replace(Some(local_addr));
        info!(addr = %local_addr, "SOCKS5 proxy server started");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer_addr, "SOCKS5 connection accepted");

                            let router = Arc::clone(&self.router);
                            let stats = Arc::clone(&self.stats);
                            let config = self.config.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream,
                                    peer_addr,
                                    router,
                                    stats,
                                    config,
                                ).await {
                                    debug!(peer = %peer_addr, error = %e, "SOCKS5 connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("SOCKS5 proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Handle a single SOCKS5 connection
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<ConnectionRouter>,
    stats: Arc<Socks5ServerStats>,
    config: Socks5ServerConfig,
) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let handshake_result = tokio::time::timeout(
        config.handshake_timeout,
        socks5_handshake(&mut stream),
    )
    .await;

    let target = match handshake_result {
        Ok(Ok(Some(target))) => target,
        Ok(Ok(None)) => {
            // Speculative connection: the client left without sending
            // anything. Not an error.
            debug!(peer = %peer_addr, "client closed before sending a request");
            return Ok(());
        }
        Ok(Err(e)) => {
            stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, error = %e, "SOCKS5 handshake failed");
            return Err(io::Error::new(io::ErrorKind::InvalidData, e));
        }
        Err(_) => {
            stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, "SOCKS5 handshake timeout");
            return Err(io::Error::new(io::ErrorKind::TimedOut, "handshake timeout"));
        }
    };

    let routed = match router.dial(&target).await {
        Ok(routed) => routed,
        Err(e) => {
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            let code = reply_code_for(&e);
            warn!(
                peer = %peer_addr,
                target = %target,
                error = %e,
                reply = format_args!("{code:#04x}"),
                "SOCKS5 dial failed"
            );
            send_reply(&mut stream, code, zero_bound_addr()).await?;
            return Ok(());
        }
    };

    debug!(
        peer = %peer_addr,
        target = %target,
        decision = %routed.decision(),
        "SOCKS5 connection routed"
    );

    // Success reply carries the local address of the outbound socket
    let bound_addr = routed.local_addr().unwrap_or_else(zero_bound_addr);
    send_reply(&mut stream, REPLY_SUCCEEDED, bound_addr).await?;

    match router.relay(&mut stream, routed).await {
        Ok(outcome) => {
            stats.connections_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                peer = %peer_addr,
                target = %target,
                bytes_up = outcome.bytes_up,
                bytes_down = outcome.bytes_down,
                "SOCKS5 connection completed"
            );
            Ok(())
        }
        Err(e) => {
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, target = %target, error = %e, "SOCKS5 relay error");
            Ok(())
        }
    }
}

/// Map a routing failure to its RFC 1928 reply code
fn reply_code_for(error: &RouteError) -> u8 {
    match error {
        RouteError::TunnelUnavailable { .. } => REPLY_GENERAL_FAILURE,
        RouteError::Dial(e) if e.is_timeout() => REPLY_HOST_UNREACHABLE,
        RouteError::Dial(e) if e.is_refused() => REPLY_CONNECTION_REFUSED,
        RouteError::Dial(_) | RouteError::Relay(_) => REPLY_GENERAL_FAILURE,
    }
}

/// The all-zero bound address used in error replies
fn zero_bound_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

/// Perform the SOCKS5 greeting and request phases
///
/// Returns the requested target with domains left unresolved, or
/// `None` when the client closed before sending any bytes. Sends the
/// protocol-correct rejection before erroring where the RFC calls for
/// one; a bad version byte just closes the connection.
async fn socks5_handshake(stream: &mut TcpStream) -> Result<Option<TargetAddr>, ProtocolError> {
    // ========== Phase 1: Auth negotiation ==========
    // Client: VER(1) NMETHODS(1) METHODS(1-255)
    let mut buf = [0u8; 260];
    let n = stream.read(&mut buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    stream.read_exact(&mut buf[1..2]).await?;

    let version = buf[0];
    let nmethods = buf[1] as usize;

    if version != SOCKS5_VERSION {
        return Err(ProtocolError::InvalidVersion {
            expected: SOCKS5_VERSION,
            actual: version,
        });
    }

    if nmethods == 0 {
        return Err(ProtocolError::malformed("empty SOCKS5 method list"));
    }

    stream.read_exact(&mut buf[..nmethods]).await?;

    if !buf[..nmethods].contains(&AUTH_METHOD_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NO_ACCEPTABLE])
            .await?;
        return Err(ProtocolError::NoAcceptableAuthMethod);
    }

    stream.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE]).await?;

    // ========== Phase 2: Request ==========
    // Client: VER(1) CMD(1) RSV(1) ATYP(1) DST.ADDR(variable) DST.PORT(2)
    stream.read_exact(&mut buf[..4]).await?;

    let version = buf[0];
    let cmd = buf[1];
    let atyp = buf[3];

    if version != SOCKS5_VERSION {
        return Err(ProtocolError::InvalidVersion {
            expected: SOCKS5_VERSION,
            actual: version,
        });
    }

    if cmd != CMD_CONNECT {
        send_error_reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(ProtocolError::UnsupportedCommand { command: cmd });
    }

    let target = match atyp {
        ATYP_IPV4 => {
            stream.read_exact(&mut buf[..6]).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
        }
        ATYP_DOMAIN => {
            stream.read_exact(&mut buf[..1]).await?;
            let domain_len = buf[0] as usize;
            if domain_len == 0 {
                send_error_reply(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                return Err(ProtocolError::malformed("zero-length domain"));
            }
            stream.read_exact(&mut buf[..domain_len + 2]).await?;
            let domain = String::from_utf8_lossy(&buf[..domain_len]).to_string();
            let port = u16::from_be_bytes([buf[domain_len], buf[domain_len + 1]]);

            // Left unresolved: proxied targets resolve at the tunnel exit
            match TargetAddr::from_host_port(&domain, port) {
                Ok(target) => target,
                Err(e) => {
                    send_error_reply(stream, REPLY_GENERAL_FAILURE).await?;
                    return Err(e);
                }
            }
        }
        ATYP_IPV6 => {
            stream.read_exact(&mut buf[..18]).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => {
            send_error_reply(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(ProtocolError::UnsupportedAddressType { atyp });
        }
    };

    trace!(target = %target, "SOCKS5 CONNECT request parsed");

    Ok(Some(target))
}

/// Send the fixed-size error reply used during the handshake phases
async fn send_error_reply(stream: &mut TcpStream, reply: u8) -> Result<(), ProtocolError> {
    // VER(1) REP(1) RSV(1) ATYP(1) BND.ADDR(4) BND.PORT(2)
    let reply_buf = [
        SOCKS5_VERSION,
        reply,
        0x00, // RSV
        ATYP_IPV4,
        0, 0, 0, 0, // BND.ADDR (0.0.0.0)
        0, 0, // BND.PORT (0)
    ];
    stream.write_all(&reply_buf).await?;
    Ok(())
}

/// Send a SOCKS5 reply carrying the given bound address
async fn send_reply(stream: &mut TcpStream, reply: u8, bound_addr: SocketAddr) -> io::Result<()> {
    let mut buf = Vec::with_capacity(22);
    buf.push(SOCKS5_VERSION);
    buf.push(reply);
    buf.push(0x00); // RSV

    match bound_addr.ip() {
        IpAddr::V4(ip) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
    }

    buf.extend_from_slice(&bound_addr.port().to_be_bytes());
    stream.write_all(&buf).await
}

// ==================== SOCKS5 Server Tests ====================
