//! Management IPC tests over a real Unix socket
//!
//! Wires the whole stack together (rule store, tunnel manager, stats,
//! speed tester) behind an [`IpcServer`] and drives it with the
//! [`IpcClient`], verifying that commands observe and mutate the same
//! live state the router uses.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;

use smart_proxy::config::IpcConfig;
use smart_proxy::error::RouteError;
use smart_proxy::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use smart_proxy::outbound::TargetAddr;
use smart_proxy::router::{ConnectionRouter, RouterConfig};
use smart_proxy::rules::{Decision, RuleAction, RuleStore};
use smart_proxy::speedtest::{SpeedTester, SpeedTesterConfig};
use smart_proxy::stats::StatsCollector;
use smart_proxy::tunnel::{TunnelConfig, TunnelStatus, UpstreamTunnelManager};

// ============================================================================
// Test Harness
// ============================================================================

/// The full stack behind one IPC socket
struct Harness {
    rules: Arc<RuleStore>,
    stats: Arc<StatsCollector>,
    tunnel: Arc<UpstreamTunnelManager>,
    router: Arc<ConnectionRouter>,
    client: IpcClient,
    server: Arc<IpcServer>,
    _tempdir: tempfile::TempDir,
}

/// Build the stack and serve it on a socket under a fresh tempdir
async fn start_harness(entry: SocketAddr) -> Harness {
    let tempdir = tempfile::tempdir().unwrap();
    let socket_path: PathBuf = tempdir.path().join("smart-proxy.sock");

    let rules = Arc::new(RuleStore::new());
    let stats = Arc::new(StatsCollector::new());
    let tunnel = Arc::new(UpstreamTunnelManager::new(TunnelConfig {
        local_addr: entry,
        connect_timeout: Duration::from_millis(200),
        health_interval: Duration::from_secs(60),
        backoff_base: Duration::from_secs(30),
        backoff_cap: Duration::from_secs(60),
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
            probe_timeout: Duration::from_millis(300),
            idle_timeout: Duration::from_secs(5),
        },
    ));
    let speedtest = Arc::new(SpeedTester::new(
        SpeedTesterConfig {
            probe_port: 1,
            probe_timeout: Duration::from_millis(200),
            cooldown: Duration::from_secs(60),
        },
        Arc::clone(&tunnel),
        Arc::clone(&stats),
    ));

    let handler = Arc::new(IpcHandler::new(
        Arc::clone(&rules),
        Arc::clone(&tunnel),
        Arc::clone(&stats),
        speedtest,
    ));
    let server = Arc::new(IpcServer::new(
        IpcConfig {
            socket_path: socket_path.clone(),
            socket_mode: 0o600,
            enabled: true,
            max_message_size: 1024 * 1024,
        },
        handler,
    ));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let client = IpcClient::new(&socket_path);
    wait_for_socket(&client).await;

    Harness {
        rules,
        stats,
        tunnel,
        router,
        client,
        server,
        _tempdir: tempdir,
    }
}

async fn wait_for_socket(client: &IpcClient) {
    for _ in 0..100 {
        if client.ping().await.unwrap_or(false) {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("IPC server did not come up within one second");
}

/// A bare TCP listener standing in for the tunnel entry port
async fn spawn_entry_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => drop(socket),
                Err(_) => break,
            }
        }
    });
    addr
}

/// A TCP echo server for direct dials
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

async fn reserved_dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ============================================================================
// Status and Stats
// ============================================================================

#[tokio::test]
async fn test_status_reflects_live_subsystems() {
    let echo = spawn_echo_server().await;
    let harness = start_harness(reserved_dead_addr().await).await;

    harness
        .rules
        .upsert("127.0.0.1", RuleAction::Direct)
        .unwrap();
    harness
        .rules
        .upsert("*.internal.example", RuleAction::Proxy)
        .unwrap();

    // One real routed connection so the counters move
    let target = TargetAddr::Ip(echo);
    let routed = harness.router.dial(&target).await.unwrap();
    assert_eq!(routed.decision(), Decision::Direct);
    drop(routed);

    let response = harness.client.send(IpcCommand::Status).await.unwrap();
    let IpcResponse::Status(status) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(status.rule_count, 2);
    assert_eq!(status.rules_version, harness.rules.version());
    assert_eq!(status.tunnel, TunnelStatus::Stopped);
    assert_eq!(status.total_connections, 1);
    assert_eq!(status.tracked_domains, 1);
    assert!(!status.version.is_empty());

    harness.server.shutdown();
}

#[tokio::test]
async fn test_stats_roundtrip_and_reset() {
    let echo = spawn_echo_server().await;
    let harness = start_harness(reserved_dead_addr().await).await;
    harness
        .rules
        .upsert("127.0.0.1", RuleAction::Direct)
        .unwrap();

    let target = TargetAddr::Ip(echo);
    drop(harness.router.dial(&target).await.unwrap());
    drop(harness.router.dial(&target).await.unwrap());

    let response = harness.client.send(IpcCommand::GetStats).await.unwrap();
    let IpcResponse::Stats(totals) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(totals.total_connections, 2);
    assert_eq!(totals.direct_connections, 2);

    let response = harness
        .client
        .send(IpcCommand::GetDomainStats {
            host: Some("127.0.0.1".to_string()),
        })
        .await
        .unwrap();
    let IpcResponse::DomainStats { domains } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].domain, "127.0.0.1");
    assert_eq!(domains[0].hit_count, 2);
    assert_eq!(domains[0].last_decision, Some(Decision::Direct));

    let response = harness.client.send(IpcCommand::ResetStats).await.unwrap();
    assert!(matches!(response, IpcResponse::Success { .. }));

    let response = harness.client.send(IpcCommand::GetStats).await.unwrap();
    let IpcResponse::Stats(totals) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(totals.total_connections, 0);
    assert_eq!(harness.stats.domain_count(), 0);

    harness.server.shutdown();
}

// ============================================================================
// Rules: IPC Writes, Router Reads
// ============================================================================

#[tokio::test]
async fn test_rule_changes_apply_to_live_routing() {
    let echo = spawn_echo_server().await;
    let harness = start_harness(reserved_dead_addr().await).await;
    let target = TargetAddr::Ip(echo);

    // Direct rule over IPC: the next dial uses it
    let response = harness
        .client
        .send(IpcCommand::UpsertRule {
            pattern: "127.0.0.1".to_string(),
            action: RuleAction::Direct,
        })
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Rule(_)));

    let routed = harness.router.dial(&target).await.unwrap();
    assert_eq!(routed.decision(), Decision::Direct);
    drop(routed);

    // Flip the same pattern to Proxy: with the tunnel stopped the dial
    // now fails fast instead of going direct
    harness
        .client
        .send(IpcCommand::UpsertRule {
            pattern: "127.0.0.1".to_string(),
            action: RuleAction::Proxy,
        })
        .await
        .unwrap();

    let err = harness.router.dial(&target).await.unwrap_err();
    assert!(matches!(err, RouteError::TunnelUnavailable { .. }));

    // Remove it: the unknown path probes direct and succeeds again
    let response = harness
        .client
        .send(IpcCommand::RemoveRule {
            pattern: "127.0.0.1".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Success { .. }));

    let routed = harness.router.dial(&target).await.unwrap();
    assert_eq!(routed.decision(), Decision::Direct);
    drop(routed);

    assert!(harness.rules.is_empty());

    harness.server.shutdown();
}

#[tokio::test]
async fn test_list_rules_returns_version_and_patterns() {
    let harness = start_harness(reserved_dead_addr().await).await;

    harness
        .client
        .send(IpcCommand::UpsertRule {
            pattern: "*.Streaming.EXAMPLE".to_string(),
            action: RuleAction::Proxy,
        })
        .await
        .unwrap();

    let response = harness.client.send(IpcCommand::ListRules).await.unwrap();
    let IpcResponse::Rules { rules, version } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(rules.len(), 1);
    // Patterns are normalized on the way in
    assert_eq!(rules[0].pattern, "*.streaming.example");
    assert_eq!(version, harness.rules.version());

    harness.server.shutdown();
}

// ============================================================================
// Tunnel Control
// ============================================================================

#[tokio::test]
async fn test_tunnel_control_over_ipc() {
    let entry = spawn_entry_listener().await;
    let harness = start_harness(entry).await;

    let response = harness.client.send(IpcCommand::TunnelStatus).await.unwrap();
    let IpcResponse::Tunnel(state) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(state.status, TunnelStatus::Stopped);

    let response = harness.client.send(IpcCommand::TunnelStart).await.unwrap();
    let IpcResponse::Tunnel(state) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert!(matches!(
        state.status,
        TunnelStatus::Starting | TunnelStatus::Running
    ));

    // Poll over IPC until the supervisor reports Running
    let mut running = false;
    for _ in 0..100 {
        let response = harness.client.send(IpcCommand::TunnelStatus).await.unwrap();
        if let IpcResponse::Tunnel(state) = response {
            if state.status == TunnelStatus::Running {
                running = true;
                break;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(running, "tunnel never reported Running over IPC");

    let response = harness.client.send(IpcCommand::TunnelStop).await.unwrap();
    let IpcResponse::Tunnel(state) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(state.status, TunnelStatus::Stopped);
    assert_eq!(harness.tunnel.status(), TunnelStatus::Stopped);

    harness.server.shutdown();
}

// ============================================================================
// Speed Test
// ============================================================================

#[tokio::test]
async fn test_speed_test_over_ipc() {
    let harness = start_harness(reserved_dead_addr().await).await;

    // Probe port 1 refuses and the tunnel is stopped: both legs None,
    // but the command itself succeeds
    let response = harness
        .client
        .send(IpcCommand::SpeedTest {
            pattern: "127.0.0.1".to_string(),
        })
        .await
        .unwrap();
    let IpcResponse::SpeedTestResult(report) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(report.domain, "127.0.0.1");
    assert_eq!(report.probe_host, "127.0.0.1");
    assert!(report.direct_ms.is_none());
    assert!(report.proxy_ms.is_none());

    // An immediate repeat is on cooldown
    let response = harness
        .client
        .send(IpcCommand::SpeedTest {
            pattern: "127.0.0.1".to_string(),
        })
        .await
        .unwrap();
    let IpcResponse::Error(error) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(error.code, ErrorCode::OperationFailed);

    harness.server.shutdown();
}

// ============================================================================
// Error Replies
// ============================================================================

#[tokio::test]
async fn test_error_codes_over_the_wire() {
    let harness = start_harness(reserved_dead_addr().await).await;

    let response = harness
        .client
        .send(IpcCommand::GetRule {
            pattern: "nonexistent.example".to_string(),
        })
        .await
        .unwrap();
    let IpcResponse::Error(error) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(error.code, ErrorCode::NotFound);

    let response = harness
        .client
        .send(IpcCommand::UpsertRule {
            pattern: "bad.*.wildcard".to_string(),
            action: RuleAction::Proxy,
        })
        .await
        .unwrap();
    let IpcResponse::Error(error) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(error.code, ErrorCode::InvalidParameters);

    let response = harness
        .client
        .send(IpcCommand::GetDomainStats {
            host: Some("never-seen.example".to_string()),
        })
        .await
        .unwrap();
    let IpcResponse::Error(error) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(error.code, ErrorCode::NotFound);

    harness.server.shutdown();
}
