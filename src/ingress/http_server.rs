//! HTTP CONNECT inbound listener
//!
//! Accepts plain HTTP proxy connections and tunnels them through the
//! [`ConnectionRouter`](crate::router::ConnectionRouter). Only the
//! `CONNECT` method is supported: browsers use it for all TLS traffic,
//! and it gives us the destination authority without touching payload
//! bytes.
//!
//! # Protocol Flow
//!
//! 1. Client sends `CONNECT host:port HTTP/1.1` plus headers
//! 2. Server parses the request (bounded read until CRLFCRLF)
//! 3. Router decides direct / proxy / fallback and dials
//! 4. On success the server replies `200 Connection Established`
//! 5. Bidirectional raw relay until either side closes
//!
//! Non-CONNECT methods get `405 Method Not Allowed`; dial failures get
//! `502 Bad Gateway`; malformed requests are closed without a reply.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ProtocolError;
use crate::outbound::TargetAddr;
use crate::router::ConnectionRouter;

/// Maximum number of headers parsed out of a CONNECT request
const MAX_HEADERS: usize = 64;

/// Reply sent once the outbound leg is established
const REPLY_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Reply sent when the outbound dial fails or the tunnel is down
const REPLY_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Reply sent for any method other than CONNECT
const REPLY_METHOD_NOT_ALLOWED: &[u8] =
    b"HTTP/1.1 405 Method Not Allowed\r\nAllow: CONNECT\r\n\r\n";

/// HTTP proxy server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Listen address (e.g., "127.0.0.1:8118")
    pub listen_addr: SocketAddr,
    /// Deadline for receiving the complete CONNECT request
    pub handshake_timeout: Duration,
    /// Upper bound on the request head, in bytes
    pub max_header_bytes: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8118),
            handshake_timeout: Duration::from_secs(10),
            max_header_bytes: 16 * 1024,
        }
    }
}

/// Statistics for the HTTP proxy server
#[derive(Debug, Default)]
pub struct HttpServerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Total connections completed (successfully relayed)
    pub connections_completed: AtomicU64,
    /// Total connection errors (parse, dial, or relay failures)
    pub connection_errors: AtomicU64,
    /// Total non-CONNECT requests rejected
    pub methods_rejected: AtomicU64,
}

impl HttpServerStats {
    /// Create a snapshot of current stats
    pub fn snapshot(&self) -> HttpServerStatsSnapshot {
        HttpServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_completed: self.connections_completed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            methods_rejected: self.methods_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of HTTP proxy server statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HttpServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_completed: u64,
    pub connection_errors: u64,
    pub methods_rejected: u64,
}

/// HTTP CONNECT inbound server
pub struct HttpProxyServer {
    config: HttpServerConfig,
    router: Arc<ConnectionRouter>,
    stats: Arc<HttpServerStats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    local_addr_tx: watch::Sender<Option<SocketAddr>>,
}

impl HttpProxyServer {
    /// Create a new HTTP proxy server
    pub fn new(config: HttpServerConfig, router: Arc<ConnectionRouter>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (local_addr_tx, _) = watch::channel(None);
        Self {
            config,
            router,
            stats: Arc::new(HttpServerStats::default()),
            shutdown_tx,
            shutdown_rx,
            local_addr_tx,
        }
    }

    /// Get server statistics
    pub fn stats(&self) -> &Arc<HttpServerStats> {
        &self.stats
    }

    /// Address the listener is actually bound to
    ///
    /// `None` until [`run`](Self::run) has bound the socket. With a
    /// port-0 listen address this is the only way to learn the port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr_tx.borrow()
    }

    /// Start the HTTP proxy server
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
        info!(addr = %local_addr, "HTTP proxy server started");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer_addr, "HTTP connection accepted");

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
                                    debug!(peer = %peer_addr, error = %e, "HTTP connection error");
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
                        info!("HTTP proxy server shutting down");
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

/// Handle a single HTTP proxy connection
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<ConnectionRouter>,
    stats: Arc<HttpServerStats>,
    config: HttpServerConfig,
) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let request = tokio::time::timeout(
        config.handshake_timeout,
        read_connect_request(&mut stream, config.max_header_bytes),
    )
    .await;

    let target = match request {
        Ok(Ok(Some(target))) => target,
        Ok(Ok(None)) => {
            // Speculative connection: the client left without sending
            // anything. Browsers do this routinely; not an error.
            debug!(peer = %peer_addr, "client closed before sending a request");
            return Ok(());
        }
        Ok(Err(ProtocolError::MethodNotAllowed { method })) => {
            stats.methods_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, method = %method, "non-CONNECT method rejected");
            let _ = stream.write_all(REPLY_METHOD_NOT_ALLOWED).await;
            return Ok(());
        }
        Ok(Err(e)) => {
            // Malformed request: close without writing a reply
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, error = %e, "malformed CONNECT request");
            return Err(io::Error::new(io::ErrorKind::InvalidData, e));
        }
        Err(_) => {
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, "CONNECT request timeout");
            return Err(io::Error::new(io::ErrorKind::TimedOut, "request timeout"));
        }
    };

    let routed = match router.dial(&target).await {
        Ok(routed) => routed,
        Err(e) => {
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            warn!(peer = %peer_addr, target = %target, error = %e, "CONNECT dial failed");
            let _ = stream.write_all(REPLY_BAD_GATEWAY).await;
            return Ok(());
        }
    };

    debug!(
        peer = %peer_addr,
        target = %target,
        decision = %routed.decision(),
        "CONNECT established"
    );

    stream.write_all(REPLY_ESTABLISHED).await?;

    match router.relay(&mut stream, routed).await {
        Ok(outcome) => {
            stats.connections_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                peer = %peer_addr,
                target = %target,
                bytes_up = outcome.bytes_up,
                bytes_down = outcome.bytes_down,
                "CONNECT relay completed"
            );
            Ok(())
        }
        Err(e) => {
            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %peer_addr, target = %target, error = %e, "CONNECT relay error");
            Ok(())
        }
    }
}

/// Read and parse a CONNECT request, returning the target authority
///
/// Reads until the CRLFCRLF head terminator, bounded by
/// `max_header_bytes`. Only the request line matters for CONNECT;
/// headers are parsed for framing but otherwise ignored. `None` means
/// the client closed before sending any bytes.
async fn read_connect_request(
    stream: &mut TcpStream,
    max_header_bytes: usize,
) -> Result<Option<TargetAddr>, ProtocolError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProtocolError::malformed("connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);

        if find_head_end(&buf).is_some() {
            break;
        }
        if buf.len() > max_header_bytes {
            return Err(ProtocolError::HeadersTooLarge {
                limit: max_header_bytes,
            });
        }
    }

    parse_connect(&buf).map(Some)
}

/// Locate the end of the request head (the CRLFCRLF terminator)
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse the request head and extract the CONNECT target
fn parse_connect(data: &[u8]) -> Result<TargetAddr, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(data) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            // CRLFCRLF was seen but the parser wants more: the head is
            // not a valid HTTP request
            return Err(ProtocolError::malformed("incomplete request head"));
        }
        Err(e) => {
            return Err(ProtocolError::malformed(format!("parse error: {e}")));
        }
    }

    let method = req
        .method
        .ok_or_else(|| ProtocolError::malformed("missing method"))?;
    let path = req
        .path
        .ok_or_else(|| ProtocolError::malformed("missing request target"))?;

    if !method.eq_ignore_ascii_case("CONNECT") {
        return Err(ProtocolError::MethodNotAllowed {
            method: method.to_string(),
        });
    }

    TargetAddr::parse(path)
}

// ==================== HTTP Server Tests ====================
