//! IPC command handler
//!
//! This module processes IPC commands and generates responses.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, ServerStatus};
use crate::error::SpeedTestError;
use crate::rules::RuleStore;
use crate::speedtest::SpeedTester;
use crate::stats::StatsCollector;
use crate::tunnel::UpstreamTunnelManager;

/// IPC command handler
///
/// Mutations go straight to the shared structures the router reads from;
/// there is no persistence here. Whatever loaded the rules at startup is
/// expected to watch for changes through this same surface.
pub struct IpcHandler {
    /// Rule store
    rules: Arc<RuleStore>,

    /// Tunnel supervisor
    tunnel: Arc<UpstreamTunnelManager>,

    /// Statistics collector
    stats: Arc<StatsCollector>,

    /// Speed tester
    speedtest: Arc<SpeedTester>,

    /// Server start time
    start_time: Instant,

    /// Server version
    version: String,
}

impl IpcHandler {
    /// Create a new IPC handler
    pub fn new(
        rules: Arc<RuleStore>,
        tunnel: Arc<UpstreamTunnelManager>,
        stats: Arc<StatsCollector>,
        speedtest: Arc<SpeedTester>,
    ) -> Self {
        Self {
            rules,
            tunnel,
            stats,
            speedtest,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Handle an IPC command and return a response
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        match command {
            IpcCommand::Ping => IpcResponse::Pong,

            IpcCommand::Status => self.handle_status(),

            IpcCommand::ListRules => IpcResponse::Rules {
                rules: self.rules.list(),
                version: self.rules.version(),
            },

            IpcCommand::GetRule { pattern } => self.handle_get_rule(&pattern),

            IpcCommand::UpsertRule { pattern, action } => self.handle_upsert_rule(&pattern, action),

            IpcCommand::RemoveRule { pattern } => self.handle_remove_rule(&pattern),

            IpcCommand::TunnelStart => {
                info!("Tunnel start requested over IPC");
                self.tunnel.start().await;
                IpcResponse::Tunnel(self.tunnel.state())
            }

            IpcCommand::TunnelStop => self.handle_tunnel_stop().await,

            IpcCommand::TunnelStatus => IpcResponse::Tunnel(self.tunnel.state()),

            IpcCommand::GetStats => IpcResponse::Stats(self.stats.totals()),

            IpcCommand::GetDomainStats { host } => self.handle_domain_stats(host.as_deref()),

            IpcCommand::ResetStats => {
                self.stats.reset();
                info!("Statistics cleared over IPC");
                IpcResponse::success_with_message("Statistics cleared")
            }

            IpcCommand::SpeedTest { pattern } => self.handle_speed_test(&pattern).await,
        }
    }

    /// Handle status command
    fn handle_status(&self) -> IpcResponse {
        let totals = self.stats.totals();

        IpcResponse::Status(ServerStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            tunnel: self.tunnel.status(),
            rule_count: self.rules.len(),
            rules_version: self.rules.version(),
            total_connections: totals.total_connections,
            tracked_domains: self.stats.domain_count(),
        })
    }

    /// Handle get rule command
    fn handle_get_rule(&self, pattern: &str) -> IpcResponse {
        match self.rules.get(pattern) {
            Some(rule) => IpcResponse::Rule(rule),
            None => IpcResponse::error(ErrorCode::NotFound, format!("No rule for '{pattern}'")),
        }
    }

    /// Handle upsert rule command
    fn handle_upsert_rule(&self, pattern: &str, action: crate::rules::RuleAction) -> IpcResponse {
        match self.rules.upsert(pattern, action) {
            Ok(rule) => {
                info!(pattern = %rule.pattern, action = %rule.action, "Rule upserted over IPC");
                IpcResponse::Rule(rule)
            }
            Err(e) => {
                warn!(pattern, "Rejected rule upsert: {}", e);
                IpcResponse::error(ErrorCode::InvalidParameters, e.to_string())
            }
        }
    }

    /// Handle remove rule command
    ///
    /// Removal is idempotent: removing an absent pattern succeeds.
    fn handle_remove_rule(&self, pattern: &str) -> IpcResponse {
        if self.rules.remove(pattern) {
            info!(pattern, "Rule removed over IPC");
            IpcResponse::success_with_message(format!("Rule '{pattern}' removed"))
        } else {
            IpcResponse::success_with_message(format!("No rule for '{pattern}'"))
        }
    }

    /// Handle tunnel stop command
    async fn handle_tunnel_stop(&self) -> IpcResponse {
        info!("Tunnel stop requested over IPC");
        match self.tunnel.stop().await {
            Ok(()) => IpcResponse::Tunnel(self.tunnel.state()),
            Err(e) => {
                warn!("Tunnel stop failed: {}", e);
                IpcResponse::error(ErrorCode::OperationFailed, e.to_string())
            }
        }
    }

    /// Handle domain stats command
    fn handle_domain_stats(&self, host: Option<&str>) -> IpcResponse {
        match host {
            None => IpcResponse::DomainStats {
                domains: self.stats.per_domain(),
            },
            Some(host) => match self.stats.domain(host) {
                Some(status) => IpcResponse::DomainStats {
                    domains: vec![status],
                },
                None => IpcResponse::error(
                    ErrorCode::NotFound,
                    format!("No statistics for '{host}'"),
                ),
            },
        }
    }

    /// Handle speed test command
    async fn handle_speed_test(&self, pattern: &str) -> IpcResponse {
        match self.speedtest.test(pattern).await {
            Ok(report) => IpcResponse::SpeedTestResult(report),
            Err(e @ SpeedTestError::Cooldown { .. }) => {
                IpcResponse::error(ErrorCode::OperationFailed, e.to_string())
            }
            Err(e @ SpeedTestError::InvalidProbeTarget { .. }) => {
                IpcResponse::error(ErrorCode::InvalidParameters, e.to_string())
            }
        }
    }
}
