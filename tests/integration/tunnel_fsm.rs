//! Tunnel supervisor lifecycle tests
//!
//! Exercises the Stopped / Starting / Running / Failed state machine
//! against real local listeners: startup probing, health-check failure,
//! relay process supervision, and how the lifecycle gates the routing
//! policy.
//!
//! # Test Categories
//!
//! 1. **Lifecycle**: clean start, idempotent start, stop from any state
//! 2. **Failure Paths**: entry never ready, spawn failure, relay exit,
//!    health probe failures
//! 3. **Routing Interplay**: Proxy rules fail fast unless Running

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use smart_proxy::error::RouteError;
use smart_proxy::outbound::TargetAddr;
use smart_proxy::router::{ConnectionRouter, RouterConfig};
use smart_proxy::rules::{Decision, RuleAction, RuleStore};
use smart_proxy::stats::StatsCollector;
use smart_proxy::tunnel::{TunnelConfig, TunnelStatus, UpstreamTunnelManager};

// ============================================================================
// Test Utilities
// ============================================================================

/// Supervisor config with test-friendly timers
///
/// The long backoff holds the Failed state still so tests can observe
/// it instead of racing the automatic retry.
fn test_config(entry: SocketAddr) -> TunnelConfig {
    TunnelConfig {
        local_addr: entry,
        connect_timeout: Duration::from_millis(200),
        health_interval: Duration::from_secs(60),
        failure_threshold: 3,
        backoff_base: Duration::from_secs(30),
        backoff_cap: Duration::from_secs(60),
        start_timeout: Duration::from_millis(400),
        ..TunnelConfig::default()
    }
}

/// A bare TCP listener standing in for the tunnel entry port
///
/// Health probes only need the connect to succeed; accepted sockets are
/// dropped right away. Aborting the returned task closes the port.
async fn spawn_entry_listener() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => drop(socket),
                Err(_) => break,
            }
        }
    });
    (addr, task)
}

/// Minimal SOCKS5 entry: no-auth handshake, success reply, then a sink
///
/// Never dials the requested destination; good enough for a router dial
/// to succeed. Probe connections that close without a greeting are
/// treated as clean disconnects.
async fn spawn_minimal_socks5_entry() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut header = [0u8; 2];
                if socket.read_exact(&mut header).await.is_err() {
                    return;
                }
                let mut methods = vec![0u8; header[1] as usize];
                if socket.read_exact(&mut methods).await.is_err() {
                    return;
                }
                if socket.write_all(&[0x05, 0x00]).await.is_err() {
                    return;
                }
                let mut request = [0u8; 4];
                if socket.read_exact(&mut request).await.is_err() {
                    return;
                }
                let skip = match request[3] {
                    0x01 => 6,
                    0x04 => 18,
                    0x03 => {
                        let mut len = [0u8; 1];
                        if socket.read_exact(&mut len).await.is_err() {
                            return;
                        }
                        len[0] as usize + 2
                    }
                    _ => return,
                };
                let mut rest = vec![0u8; skip];
                if socket.read_exact(&mut rest).await.is_err() {
                    return;
                }
                let reply = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
                if socket.write_all(&reply).await.is_err() {
                    return;
                }
                // Hold the stream open until the client goes away
                let mut sink = [0u8; 256];
                while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });
    (addr, task)
}

/// Reserve an address that refuses connections
async fn reserved_dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn wait_status(tunnel: &UpstreamTunnelManager, want: TunnelStatus) {
    for _ in 0..150 {
        if tunnel.status() == want {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "tunnel never reached {want}, currently {:?}",
        tunnel.state()
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_initial_state_is_stopped() {
    let tunnel = UpstreamTunnelManager::new(test_config(reserved_dead_addr().await));
    assert_eq!(tunnel.status(), TunnelStatus::Stopped);
    assert!(!tunnel.is_running());

    let state = tunnel.state();
    assert!(state.started_at.is_none());
    assert!(state.last_error.is_none());
    assert!(state.uptime_secs().is_none());
}

#[tokio::test]
async fn test_tunnel_reaches_running_when_entry_accepts() {
    let (entry, guard) = spawn_entry_listener().await;
    let tunnel = UpstreamTunnelManager::new(test_config(entry));

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;
    assert!(tunnel.is_running());

    let state = tunnel.state();
    assert_eq!(state.local_addr, entry);
    assert!(state.started_at.is_some());
    assert!(state.last_error.is_none());
    assert!(state.uptime_secs().is_some());

    tunnel.stop().await.unwrap();
    assert_eq!(tunnel.status(), TunnelStatus::Stopped);
    assert!(tunnel.state().started_at.is_none());

    guard.abort();
}

#[tokio::test]
async fn test_stop_without_start_is_a_no_op() {
    let tunnel = UpstreamTunnelManager::new(test_config(reserved_dead_addr().await));
    tunnel.stop().await.unwrap();
    assert_eq!(tunnel.status(), TunnelStatus::Stopped);

    // And twice, for good measure
    tunnel.stop().await.unwrap();
    assert_eq!(tunnel.status(), TunnelStatus::Stopped);
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    let (entry, guard) = spawn_entry_listener().await;
    let tunnel = UpstreamTunnelManager::new(test_config(entry));

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;
    let first_started_at = tunnel.state().started_at;

    // A second start must not restart the supervisor
    tunnel.start().await;
    assert_eq!(tunnel.status(), TunnelStatus::Running);
    assert_eq!(tunnel.state().started_at, first_started_at);

    tunnel.stop().await.unwrap();
    guard.abort();
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn test_entry_never_ready_fails_with_reason() {
    let tunnel = UpstreamTunnelManager::new(test_config(reserved_dead_addr().await));

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Failed).await;

    let reason = tunnel.state().last_error.unwrap();
    assert!(reason.contains("not accepting"), "unexpected reason: {reason}");

    // Stop works from Failed, during the pending backoff
    tunnel.stop().await.unwrap();
    assert_eq!(tunnel.status(), TunnelStatus::Stopped);
}

#[tokio::test]
async fn test_relay_spawn_failure_reported() {
    let mut config = test_config(reserved_dead_addr().await);
    config.relay_command = Some(vec!["/nonexistent-binary-for-tests".to_string()]);
    let tunnel = UpstreamTunnelManager::new(config);

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Failed).await;

    let reason = tunnel.state().last_error.unwrap();
    assert!(
        reason.contains("spawn relay command"),
        "unexpected reason: {reason}"
    );

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_relay_exit_detected_while_starting() {
    let mut config = test_config(reserved_dead_addr().await);
    // Exits immediately, long before the entry port could come up
    config.relay_command = Some(vec!["true".to_string()]);
    let tunnel = UpstreamTunnelManager::new(config);

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Failed).await;

    let reason = tunnel.state().last_error.unwrap();
    assert!(reason.contains("exited"), "unexpected reason: {reason}");

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_probe_failures_fail_the_tunnel() {
    let (entry, guard) = spawn_entry_listener().await;
    let mut config = test_config(entry);
    config.health_interval = Duration::from_millis(100);
    config.failure_threshold = 2;
    let tunnel = UpstreamTunnelManager::new(config);

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;

    // Close the entry port; the next probes get connection refused
    guard.abort();
    wait_status(&tunnel, TunnelStatus::Failed).await;

    let reason = tunnel.state().last_error.unwrap();
    assert!(
        reason.contains("health probes failed"),
        "unexpected reason: {reason}"
    );

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_after_failure_retries_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = listener.local_addr().unwrap();
    drop(listener);

    let tunnel = UpstreamTunnelManager::new(test_config(entry));
    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Failed).await;

    // The entry comes up; a fresh start() must not wait out the 30s backoff
    let listener = TcpListener::bind(entry).await.unwrap();
    let guard = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => drop(socket),
                Err(_) => break,
            }
        }
    });

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;

    tunnel.stop().await.unwrap();
    guard.abort();
}

#[tokio::test]
#[ignore] // Rebinds a fixed port after live connections; can hit TIME_WAIT
async fn test_tunnel_recovers_after_entry_returns() {
    let (entry, guard) = spawn_entry_listener().await;
    let mut config = test_config(entry);
    config.health_interval = Duration::from_millis(100);
    config.failure_threshold = 2;
    config.backoff_base = Duration::from_millis(100);
    config.backoff_cap = Duration::from_millis(200);
    let tunnel = UpstreamTunnelManager::new(config);

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;

    guard.abort();
    wait_status(&tunnel, TunnelStatus::Failed).await;

    // Entry returns on the same port; the supervisor retries on its own
    let listener = TcpListener::bind(entry).await.unwrap();
    let guard = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => drop(socket),
                Err(_) => break,
            }
        }
    });

    wait_status(&tunnel, TunnelStatus::Running).await;

    tunnel.stop().await.unwrap();
    guard.abort();
}

// ============================================================================
// Routing Interplay
// ============================================================================

#[tokio::test]
async fn test_tunnel_lifecycle_gates_proxy_routing() {
    let (entry, guard) = spawn_minimal_socks5_entry().await;

    let rules = Arc::new(RuleStore::new());
    rules.upsert("127.0.0.1", RuleAction::Proxy).unwrap();
    let stats = Arc::new(StatsCollector::new());
    let tunnel = Arc::new(UpstreamTunnelManager::new(test_config(entry)));
    let router = ConnectionRouter::new(
        Arc::clone(&rules),
        Arc::clone(&tunnel),
        Arc::clone(&stats),
        RouterConfig {
            direct_timeout: Duration::from_secs(2),
            proxy_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        },
    );

    let target = TargetAddr::parse("127.0.0.1:9").unwrap();

    // Stopped: fail fast, no direct attempt for a Proxy rule
    let err = router.dial(&target).await.unwrap_err();
    assert!(matches!(err, RouteError::TunnelUnavailable { .. }));

    tunnel.start().await;
    wait_status(&tunnel, TunnelStatus::Running).await;

    // Running: dials through the entry
    let routed = router.dial(&target).await.unwrap();
    assert_eq!(routed.decision(), Decision::Proxy);
    drop(routed);

    tunnel.stop().await.unwrap();

    // Stopped again: back to failing fast
    let err = router.dial(&target).await.unwrap_err();
    assert!(matches!(err, RouteError::TunnelUnavailable { .. }));

    let totals = stats.totals();
    assert_eq!(totals.total_connections, 3);
    assert_eq!(totals.proxy_connections, 1);
    assert_eq!(totals.failed_connections, 2);

    guard.abort();
}
