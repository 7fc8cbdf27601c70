//! End-to-end routing tests through both inbound listeners
//!
//! These tests run the full path a client connection takes: inbound
//! handshake, rule lookup, routing decision, outbound dial, and the
//! bidirectional relay. A relaying mock SOCKS5 server stands in for the
//! upstream tunnel entry, and a local echo server plays the destination.
//!
//! # Test Categories
//!
//! 1. **Direct Routing**: explicit Direct rules through both listeners
//! 2. **Proxy Routing**: explicit Proxy rules, with and without a tunnel
//! 3. **Unknown Domains**: direct probe and the single tunnel fallback
//! 4. **Protocol Edges**: malformed requests, rejected methods, timeouts

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use smart_proxy::ingress::{
    HttpProxyServer, HttpServerConfig, Socks5ProxyServer, Socks5ServerConfig,
};
use smart_proxy::router::{ConnectionRouter, RouterConfig};
use smart_proxy::rules::{Decision, RuleAction, RuleStore};
use smart_proxy::stats::StatsCollector;
use smart_proxy::tunnel::{TunnelConfig, UpstreamTunnelManager};

// ============================================================================
// SOCKS5 Protocol Constants
// ============================================================================

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_METHOD_NONE: u8 = 0x00;
const AUTH_METHOD_PASSWORD: u8 = 0x02;
const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

// ============================================================================
// Test Servers
// ============================================================================

/// Spawn a TCP echo server; every accepted connection is echoed until EOF
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Spawn a mock upstream SOCKS5 server that actually relays
///
/// Performs the no-auth handshake, dials the requested destination (or
/// `exit_override` when set, modelling a destination only reachable from
/// the tunnel exit), and then relays bytes both ways. Health probes from
/// the tunnel supervisor connect and drop without a greeting; the
/// handler treats any early read failure as a clean disconnect.
async fn spawn_upstream_socks5(exit_override: Option<SocketAddr>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(relay_one_connection(socket, exit_override));
        }
    });
    addr
}

async fn relay_one_connection(mut socket: TcpStream, exit_override: Option<SocketAddr>) {
    let mut header = [0u8; 2];
    if socket.read_exact(&mut header).await.is_err() || header[0] != SOCKS5_VERSION {
        return;
    }
    let mut methods = vec![0u8; header[1] as usize];
    if socket.read_exact(&mut methods).await.is_err() {
        return;
    }
    if socket
        .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE])
        .await
        .is_err()
    {
        return;
    }

    // Request: VER | CMD | RSV | ATYP
    let mut request = [0u8; 4];
    if socket.read_exact(&mut request).await.is_err() || request[1] != CMD_CONNECT {
        return;
    }

    let target: Option<SocketAddr> = match request[3] {
        ATYP_IPV4 => {
            let mut rest = [0u8; 6];
            if socket.read_exact(&mut rest).await.is_err() {
                return;
            }
            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            Some(SocketAddr::new(IpAddr::V4(ip), port))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            if socket.read_exact(&mut len).await.is_err() {
                return;
            }
            let domain_len = len[0] as usize;
            let mut rest = vec![0u8; domain_len + 2];
            if socket.read_exact(&mut rest).await.is_err() {
                return;
            }
            // Tests only send IP literals through the domain form
            let host = String::from_utf8_lossy(&rest[..domain_len]).to_string();
            let port = u16::from_be_bytes([rest[domain_len], rest[domain_len + 1]]);
            host.parse().ok().map(|ip| SocketAddr::new(ip, port))
        }
        ATYP_IPV6 => {
            let mut rest = [0u8; 18];
            if socket.read_exact(&mut rest).await.is_err() {
                return;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let port = u16::from_be_bytes([rest[16], rest[17]]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => return,
    };

    let Some(exit) = exit_override.or(target) else {
        return;
    };

    match TcpStream::connect(exit).await {
        Ok(mut remote) => {
            let reply = [
                SOCKS5_VERSION,
                REPLY_SUCCEEDED,
                0x00,
                ATYP_IPV4,
                127,
                0,
                0,
                1,
                0,
                0,
            ];
            if socket.write_all(&reply).await.is_err() {
                return;
            }
            let _ = tokio::io::copy_bidirectional(&mut socket, &mut remote).await;
        }
        Err(_) => {
            let reply = [
                SOCKS5_VERSION,
                REPLY_GENERAL_FAILURE,
                0x00,
                ATYP_IPV4,
                0,
                0,
                0,
                0,
                0,
                0,
            ];
            let _ = socket.write_all(&reply).await;
        }
    }
}

/// Reserve an address that nothing listens on
///
/// Binds and immediately drops a listener; connects to the address are
/// refused until the kernel reuses the port.
async fn reserved_dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ============================================================================
// Stack Wiring
// ============================================================================

struct Stack {
    rules: Arc<RuleStore>,
    stats: Arc<StatsCollector>,
    tunnel: Arc<UpstreamTunnelManager>,
    router: Arc<ConnectionRouter>,
}

/// Build a router stack with test-friendly timeouts
fn build_stack(entry: SocketAddr) -> Stack {
    let rules = Arc::new(RuleStore::new());
    let stats = Arc::new(StatsCollector::new());
    let tunnel = Arc::new(UpstreamTunnelManager::new(TunnelConfig {
        local_addr: entry,
        connect_timeout: Duration::from_millis(500),
        health_interval: Duration::from_secs(60),
        failure_threshold: 3,
        backoff_base: Duration::from_millis(100),
        backoff_cap: Duration::from_secs(1),
        start_timeout: Duration::from_secs(2),
        ..TunnelConfig::default()
    }));
    let router = Arc::new(ConnectionRouter::new(
        Arc::clone(&rules),
        Arc::clone(&tunnel),
        Arc::clone(&stats),
        RouterConfig {
            direct_timeout: Duration::from_secs(2),
            proxy_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
        },
    ));
    Stack {
        rules,
        stats,
        tunnel,
        router,
    }
}

async fn start_http_server(router: Arc<ConnectionRouter>) -> (Arc<HttpProxyServer>, SocketAddr) {
    start_http_server_with(router, Duration::from_secs(2)).await
}

async fn start_http_server_with(
    router: Arc<ConnectionRouter>,
    handshake_timeout: Duration,
) -> (Arc<HttpProxyServer>, SocketAddr) {
    let config = HttpServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        handshake_timeout,
        max_header_bytes: 16 * 1024,
    };
    let server = Arc::new(HttpProxyServer::new(config, router));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    let addr = wait_for_bind(|| server.local_addr()).await;
    (server, addr)
}

async fn start_socks5_server(
    router: Arc<ConnectionRouter>,
) -> (Arc<Socks5ProxyServer>, SocketAddr) {
    let config = Socks5ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        handshake_timeout: Duration::from_secs(2),
    };
    let server = Arc::new(Socks5ProxyServer::new(config, router));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    let addr = wait_for_bind(|| server.local_addr()).await;
    (server, addr)
}

async fn wait_for_bind(local_addr: impl Fn() -> Option<SocketAddr>) -> SocketAddr {
    for _ in 0..100 {
        if let Some(addr) = local_addr() {
            return addr;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not bind within one second");
}

async fn wait_running(tunnel: &UpstreamTunnelManager) {
    for _ in 0..100 {
        if tunnel.is_running() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "tunnel did not reach Running within two seconds: {:?}",
        tunnel.state()
    );
}

async fn wait_for(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Proxy Clients
// ============================================================================

/// Send a CONNECT request and read the full reply head
async fn http_connect(proxy: SocketAddr, authority: &str) -> (String, TcpStream) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    (String::from_utf8_lossy(&head).to_string(), stream)
}

/// SOCKS5 handshake against the inbound listener; returns the reply code
async fn socks5_connect(proxy: SocketAddr, host: &str, port: u16) -> (u8, TcpStream) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_METHOD_NONE])
        .await
        .unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [SOCKS5_VERSION, AUTH_METHOD_NONE]);

    let mut request = vec![
        SOCKS5_VERSION,
        CMD_CONNECT,
        0x00,
        ATYP_DOMAIN,
        host.len() as u8,
    ];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let code = header[1];
    match header[3] {
        ATYP_IPV4 => {
            let mut rest = [0u8; 6];
            stream.read_exact(&mut rest).await.unwrap();
        }
        ATYP_IPV6 => {
            let mut rest = [0u8; 18];
            stream.read_exact(&mut rest).await.unwrap();
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.unwrap();
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await.unwrap();
        }
        other => panic!("unexpected ATYP in reply: {other:#04x}"),
    }
    (code, stream)
}

/// Write a payload, read it back, and assert the echo matches
async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

// ============================================================================
// Direct Routing
// ============================================================================

#[tokio::test]
async fn test_direct_rule_via_http_connect() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    stack.rules.upsert("127.0.0.1", RuleAction::Direct).unwrap();

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, mut stream) = http_connect(proxy, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected reply: {head}");
    assert_echo(&mut stream, b"hello over direct").await;
    drop(stream);

    let totals = stack.stats.totals();
    assert_eq!(totals.total_connections, 1);
    assert_eq!(totals.direct_connections, 1);
    assert_eq!(totals.proxy_connections, 0);

    let domain = stack.stats.domain("127.0.0.1").unwrap();
    assert_eq!(domain.hit_count, 1);
    assert_eq!(domain.last_decision, Some(Decision::Direct));

    server.shutdown();
}

#[tokio::test]
async fn test_direct_rule_via_socks5() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    stack.rules.upsert("127.0.0.1", RuleAction::Direct).unwrap();

    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let (code, mut stream) = socks5_connect(proxy, "127.0.0.1", echo.port()).await;
    assert_eq!(code, REPLY_SUCCEEDED);
    assert_echo(&mut stream, b"hello over socks5").await;
    drop(stream);

    let totals = stack.stats.totals();
    assert_eq!(totals.direct_connections, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_relay_transfer_bytes_recorded() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    stack.rules.upsert("127.0.0.1", RuleAction::Direct).unwrap();

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let payload = b"counted in both directions";
    let (head, mut stream) = http_connect(proxy, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert_echo(&mut stream, payload).await;
    drop(stream);

    // Transfer totals land when the relay finishes, after the client drop
    let stats = Arc::clone(&stack.stats);
    let want = payload.len() as u64;
    wait_for(
        || {
            let totals = stats.totals();
            totals.bytes_up >= want && totals.bytes_down >= want
        },
        "transfer totals",
    )
    .await;

    server.shutdown();
}

// ============================================================================
// Proxy Routing
// ============================================================================

#[tokio::test]
async fn test_proxy_rule_through_tunnel_http() {
    let echo = spawn_echo_server().await;
    let upstream = spawn_upstream_socks5(None).await;
    let stack = build_stack(upstream);
    stack.rules.upsert("127.0.0.1", RuleAction::Proxy).unwrap();

    stack.tunnel.start().await;
    wait_running(&stack.tunnel).await;

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, mut stream) = http_connect(proxy, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected reply: {head}");
    assert_echo(&mut stream, b"hello through the tunnel").await;
    drop(stream);

    let totals = stack.stats.totals();
    assert_eq!(totals.proxy_connections, 1);
    assert_eq!(totals.direct_connections, 0);

    let domain = stack.stats.domain("127.0.0.1").unwrap();
    assert_eq!(domain.last_decision, Some(Decision::Proxy));

    server.shutdown();
    stack.tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_proxy_rule_through_tunnel_socks5() {
    let echo = spawn_echo_server().await;
    let upstream = spawn_upstream_socks5(None).await;
    let stack = build_stack(upstream);
    stack.rules.upsert("127.0.0.1", RuleAction::Proxy).unwrap();

    stack.tunnel.start().await;
    wait_running(&stack.tunnel).await;

    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let (code, mut stream) = socks5_connect(proxy, "127.0.0.1", echo.port()).await;
    assert_eq!(code, REPLY_SUCCEEDED);
    assert_echo(&mut stream, b"socks5 in, socks5 out").await;
    drop(stream);

    assert_eq!(stack.stats.totals().proxy_connections, 1);

    server.shutdown();
    stack.tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_proxy_rule_fails_fast_when_tunnel_stopped_http() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    stack.rules.upsert("127.0.0.1", RuleAction::Proxy).unwrap();
    // Tunnel never started: Proxy rules must fail without dialing direct

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, _stream) = http_connect(proxy, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 502"), "unexpected reply: {head}");

    let totals = stack.stats.totals();
    assert_eq!(totals.total_connections, 1);
    assert_eq!(totals.failed_connections, 1);
    assert_eq!(totals.proxy_connections, 0);
    assert_eq!(totals.direct_connections, 0);

    server.shutdown();
}

#[tokio::test]
async fn test_proxy_rule_fails_fast_when_tunnel_stopped_socks5() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    stack.rules.upsert("127.0.0.1", RuleAction::Proxy).unwrap();

    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let (code, _stream) = socks5_connect(proxy, "127.0.0.1", echo.port()).await;
    assert_eq!(code, REPLY_GENERAL_FAILURE);

    assert_eq!(stack.stats.totals().failed_connections, 1);

    server.shutdown();
}

// ============================================================================
// Unknown Domains
// ============================================================================

#[tokio::test]
async fn test_unknown_host_probed_direct() {
    let echo = spawn_echo_server().await;
    let stack = build_stack(reserved_dead_addr().await);
    // No rules at all: the direct probe reaches the echo server

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, mut stream) = http_connect(proxy, &echo.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert_echo(&mut stream, b"probe says direct").await;
    drop(stream);

    let totals = stack.stats.totals();
    assert_eq!(totals.direct_connections, 1);
    assert_eq!(totals.fallback_connections, 0);

    server.shutdown();
}

#[tokio::test]
async fn test_unknown_host_falls_back_through_tunnel() {
    let echo = spawn_echo_server().await;
    // The requested destination refuses connections; the upstream exit
    // relays to the echo server instead, like a host only reachable
    // from the far side of the tunnel
    let dead = reserved_dead_addr().await;
    let upstream = spawn_upstream_socks5(Some(echo)).await;
    let stack = build_stack(upstream);

    stack.tunnel.start().await;
    wait_running(&stack.tunnel).await;

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, mut stream) = http_connect(proxy, &dead.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected reply: {head}");
    assert_echo(&mut stream, b"rescued by the fallback").await;
    drop(stream);

    let totals = stack.stats.totals();
    assert_eq!(totals.fallback_connections, 1);
    assert_eq!(totals.direct_connections, 0);

    let domain = stack.stats.domain("127.0.0.1").unwrap();
    assert_eq!(domain.last_decision, Some(Decision::FallbackProxy));

    server.shutdown();
    stack.tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_host_fallback_without_tunnel_fails() {
    let dead = reserved_dead_addr().await;
    let stack = build_stack(reserved_dead_addr().await);
    // Probe fails and the tunnel is stopped: exactly one fallback
    // attempt, then the connection fails

    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let (head, _stream) = http_connect(proxy, &dead.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 502"), "unexpected reply: {head}");

    let totals = stack.stats.totals();
    assert_eq!(totals.total_connections, 1);
    assert_eq!(totals.failed_connections, 1);

    server.shutdown();
}

// ============================================================================
// Protocol Edges
// ============================================================================

#[tokio::test]
async fn test_http_rejects_non_connect() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    assert!(reply.starts_with("HTTP/1.1 405"), "unexpected reply: {reply}");
    assert!(reply.contains("Allow: CONNECT"));

    assert_eq!(server.stats().snapshot().methods_rejected, 1);
    assert_eq!(stack.stats.totals().total_connections, 0);

    server.shutdown();
}

#[tokio::test]
async fn test_http_closes_malformed_request_without_reply() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) = start_http_server(Arc::clone(&stack.router)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(b"GARBAGE\r\n\r\n").await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty(), "expected silent close, got {reply:?}");

    assert_eq!(server.stats().snapshot().connection_errors, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_http_handshake_timeout_closes_connection() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) =
        start_http_server_with(Arc::clone(&stack.router), Duration::from_millis(200)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    // Half a request line, then silence
    stream.write_all(b"CONNECT 127.0.0.1:80 HT").await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());

    assert_eq!(server.stats().snapshot().connection_errors, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_socks5_rejects_wrong_version() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    // SOCKS4 greeting
    stream.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty(), "expected silent close, got {reply:?}");

    assert_eq!(server.stats().snapshot().handshake_failures, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_socks5_rejects_without_common_auth_method() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    // Only password auth offered; the listener supports none
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_METHOD_PASSWORD])
        .await
        .unwrap();

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [SOCKS5_VERSION, AUTH_METHOD_NO_ACCEPTABLE]);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    assert_eq!(server.stats().snapshot().handshake_failures, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_socks5_rejects_udp_associate() {
    let stack = build_stack(reserved_dead_addr().await);
    let (server, proxy) = start_socks5_server(Arc::clone(&stack.router)).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_METHOD_NONE])
        .await
        .unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();

    // UDP ASSOCIATE for 127.0.0.1:0
    stream
        .write_all(&[
            SOCKS5_VERSION,
            CMD_UDP_ASSOCIATE,
            0x00,
            ATYP_IPV4,
            127,
            0,
            0,
            1,
            0,
            0,
        ])
        .await
        .unwrap();

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1], REPLY_COMMAND_NOT_SUPPORTED);

    server.shutdown();
}
