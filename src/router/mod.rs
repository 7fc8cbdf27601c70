//! Connection routing
//!
//! [`ConnectionRouter`] turns a destination into an established
//! outbound connection according to the rule table:
//!
//! - explicit Direct rule: dial the destination, no fallback
//! - explicit Proxy rule: require a Running tunnel, fail fast otherwise
//! - no rule: probe directly with a short timeout, then fall back to
//!   the tunnel exactly once
//!
//! Listeners call [`ConnectionRouter::dial`], send their
//! protocol-specific reply, then hand the client stream to
//! [`ConnectionRouter::relay`]. Every dial records exactly one outcome
//! (domain, decision, latency, success) to the stats collector,
//! failures included; the relay step adds byte counts afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RouteError;
use crate::io::{relay_bidirectional, RelayOutcome};
use crate::outbound::{DirectOutbound, Outbound, OutboundConnection, TargetAddr};
use crate::rules::{Decision, RuleAction, RuleStore};
use crate::stats::StatsCollector;
use crate::tunnel::{TunnelStatus, UpstreamTunnelManager};

/// Timeouts governing the routing policy
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Dial timeout for explicit Direct rules
    pub direct_timeout: Duration,
    /// Dial timeout through the tunnel
    pub proxy_timeout: Duration,
    /// Short direct-probe timeout for unknown domains
    pub probe_timeout: Duration,
    /// Relay idle timeout
    pub idle_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_secs(10),
            proxy_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// An established outbound connection with its routing decision
#[derive(Debug)]
pub struct RoutedConnection {
    decision: Decision,
    latency: Duration,
    connection: OutboundConnection,
}

impl RoutedConnection {
    /// How this connection was routed
    #[must_use]
    pub const fn decision(&self) -> Decision {
        self.decision
    }

    /// Establishment latency, decision start to outbound connected
    #[must_use]
    pub const fn latency(&self) -> Duration {
        self.latency
    }

    /// Local address of the outbound socket
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.connection.local_addr()
    }

    /// Address the outbound socket dialed
    #[must_use]
    pub fn remote_addr(&self) -> std::net::SocketAddr {
        self.connection.remote_addr()
    }
}

/// Routes connections per the rule table and tunnel state
pub struct ConnectionRouter {
    rules: Arc<RuleStore>,
    tunnel: Arc<UpstreamTunnelManager>,
    stats: Arc<StatsCollector>,
    direct: DirectOutbound,
    config: RouterConfig,
}

impl ConnectionRouter {
    /// Create a router over the shared rule table, tunnel, and stats
    #[must_use]
    pub fn new(
        rules: Arc<RuleStore>,
        tunnel: Arc<UpstreamTunnelManager>,
        stats: Arc<StatsCollector>,
        config: RouterConfig,
    ) -> Self {
        Self {
            rules,
            tunnel,
            stats,
            direct: DirectOutbound::new(),
            config,
        }
    }

    /// Decide and dial
    ///
    /// Records the outcome to the stats collector exactly once,
    /// whether the dial succeeded or not.
    pub async fn dial(&self, target: &TargetAddr) -> Result<RoutedConnection, RouteError> {
        let host = target.host();
        let start = Instant::now();

        let matched = self.rules.match_host(&host);
        let rule_pattern = matched.as_ref().map(|r| r.pattern.clone());

        let (decision, result) = match matched.map(|r| r.action) {
            Some(RuleAction::Direct) => (
                Decision::Direct,
                self.direct
                    .connect(target, self.config.direct_timeout)
                    .await
                    .map_err(RouteError::from),
            ),
            Some(RuleAction::Proxy) => (Decision::Proxy, self.dial_tunnel(target).await),
            None => self.dial_unknown(target).await,
        };

        let latency = start.elapsed();
        match result {
            Ok(connection) => {
                self.stats.record(&host, decision, latency, true);
                debug!(
                    target = %target,
                    decision = %decision,
                    rule = ?rule_pattern,
                    latency_ms = latency.as_millis() as u64,
                    "routing decision"
                );
                Ok(RoutedConnection {
                    decision,
                    latency,
                    connection,
                })
            }
            Err(e) => {
                self.stats.record(&host, decision, latency, false);
                debug!(
                    target = %target,
                    decision = %decision,
                    rule = ?rule_pattern,
                    error = %e,
                    "dial failed"
                );
                Err(e)
            }
        }
    }

    /// Relay the client against the routed connection
    ///
    /// Byte counts are added to the transfer totals however the relay
    /// ends. A mid-stream error is returned after the counts are
    /// recorded; it is never retried.
    pub async fn relay(
        &self,
        client: &mut TcpStream,
        routed: RoutedConnection,
    ) -> Result<RelayOutcome, RouteError> {
        let mut remote = routed.connection.into_stream();
        let mut outcome = relay_bidirectional(client, &mut remote, self.config.idle_timeout).await;

        self.stats.add_transfer(outcome.bytes_up, outcome.bytes_down);
        debug!(
            bytes_up = outcome.bytes_up,
            bytes_down = outcome.bytes_down,
            idle = outcome.idle,
            "relay finished"
        );

        match outcome.error.take() {
            Some(e) => Err(RouteError::Relay(e)),
            None => Ok(outcome),
        }
    }

    /// The relay idle timeout, for listeners that log it
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout
    }

    /// Dial through the tunnel, failing fast unless it is Running
    async fn dial_tunnel(&self, target: &TargetAddr) -> Result<OutboundConnection, RouteError> {
        let status = self.tunnel.status();
        if status != TunnelStatus::Running {
            warn!(target = %target, status = %status, "proxy dial refused, tunnel not running");
            return Err(RouteError::tunnel_unavailable(status.as_str()));
        }

        let outbound = self.tunnel.outbound();
        outbound
            .connect(target, self.config.proxy_timeout)
            .await
            .map_err(RouteError::from)
    }

    /// No rule: short direct probe, then exactly one tunnel fallback
    async fn dial_unknown(
        &self,
        target: &TargetAddr,
    ) -> (Decision, Result<OutboundConnection, RouteError>) {
        match self.direct.connect(target, self.config.probe_timeout).await {
            Ok(connection) => (Decision::Direct, Ok(connection)),
            Err(e) => {
                debug!(
                    target = %target,
                    error = %e,
                    "direct probe failed, falling back to tunnel"
                );
                (Decision::FallbackProxy, self.dial_tunnel(target).await)
            }
        }
    }
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("config", &self.config)
            .finish()
    }
}
