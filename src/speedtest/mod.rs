//! Out-of-band direct-vs-proxy latency probes
//!
//! [`SpeedTester`] answers one question for rule authoring: is this
//! domain faster dialed directly or through the upstream relay? It
//! dials the probe host once each way, measures TCP establishment
//! latency, and records both numbers into the stats collector. Probes
//! never touch live routing: no rule is consulted, no decision counter
//! moves, no fallback runs.
//!
//! Wildcard patterns cannot be dialed as written, so they map to a
//! representative host: a small table covers the common ones and
//! anything else gets an `api.` prefix in place of the `*.`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SpeedTestError;
use crate::outbound::{DirectOutbound, Outbound, TargetAddr};
use crate::stats::StatsCollector;
use crate::tunnel::{TunnelStatus, UpstreamTunnelManager};

/// Representative probe hosts for wildcard patterns
///
/// A wildcard like `*.telegram.org` has no dialable form; these are
/// hosts known to answer on 443 for the zones that commonly end up in
/// rule tables.
static PROBE_HOSTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("*.telegram.org", "api.telegram.org"),
        ("*.google.com", "www.google.com"),
        ("*.googleapis.com", "www.googleapis.com"),
        ("*.github.com", "api.github.com"),
        ("*.anthropic.com", "api.anthropic.com"),
    ])
});

/// Speed tester configuration
#[derive(Debug, Clone)]
pub struct SpeedTesterConfig {
    /// Port probed on the target host
    pub probe_port: u16,
    /// Per-probe connect deadline
    pub probe_timeout: Duration,
    /// Minimum interval between probes of the same pattern
    pub cooldown: Duration,
}

impl Default for SpeedTesterConfig {
    fn default() -> Self {
        Self {
            probe_port: 443,
            probe_timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Result of one direct-vs-proxy probe pair
///
/// `None` means that leg failed or was skipped (the proxy leg is
/// skipped whenever the tunnel is not running).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedTestReport {
    /// The pattern the test was requested for
    pub domain: String,
    /// The host actually dialed
    pub probe_host: String,
    /// Direct TCP establishment latency
    pub direct_ms: Option<u64>,
    /// Latency through the upstream relay, full handshake included
    pub proxy_ms: Option<u64>,
}

/// Probes destinations directly and through the upstream relay
pub struct SpeedTester {
    config: SpeedTesterConfig,
    tunnel: Arc<UpstreamTunnelManager>,
    stats: Arc<StatsCollector>,
    direct: DirectOutbound,
    last_probe: DashMap<String, Instant>,
}

impl SpeedTester {
    /// Create a speed tester over the shared tunnel and stats
    #[must_use]
    pub fn new(
        config: SpeedTesterConfig,
        tunnel: Arc<UpstreamTunnelManager>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            config,
            tunnel,
            stats,
            direct: DirectOutbound::new(),
            last_probe: DashMap::new(),
        }
    }

    /// Probe the pattern's representative host both ways
    ///
    /// Runs the direct and proxied probes concurrently, records the
    /// latencies under the probed host, and returns the report. A
    /// failed leg is `None` in the report, not an error.
    ///
    /// # Errors
    ///
    /// Returns `SpeedTestError::Cooldown` when the pattern was probed
    /// too recently, and `SpeedTestError::InvalidProbeTarget` when the
    /// pattern cannot be turned into a dialable host.
    pub async fn test(&self, pattern: &str) -> Result<SpeedTestReport, SpeedTestError> {
        let key = pattern.trim().to_ascii_lowercase();

        if let Some(last) = self.last_probe.get(&key) {
            let elapsed = last.elapsed();
            if elapsed < self.config.cooldown {
                let remaining = self.config.cooldown - elapsed;
                return Err(SpeedTestError::Cooldown {
                    pattern: key,
                    remaining_secs: remaining.as_secs().max(1),
                });
            }
        }
        self.last_probe.insert(key.clone(), Instant::now());

        let host = probe_host(&key);
        let target = TargetAddr::from_host_port(&host, self.config.probe_port).map_err(|e| {
            SpeedTestError::InvalidProbeTarget {
                pattern: key.clone(),
                reason: e.to_string(),
            }
        })?;

        let (direct_ms, proxy_ms) =
            tokio::join!(self.probe_direct(&target), self.probe_proxy(&target));

        self.stats.record_speed(&host, direct_ms, proxy_ms);

        info!(
            pattern = %key,
            host = %host,
            direct_ms = ?direct_ms,
            proxy_ms = ?proxy_ms,
            "speed test finished"
        );

        Ok(SpeedTestReport {
            domain: key,
            probe_host: host,
            direct_ms,
            proxy_ms,
        })
    }

    /// Measure direct TCP establishment latency
    async fn probe_direct(&self, target: &TargetAddr) -> Option<u64> {
        let start = Instant::now();
        match self.direct.connect(target, self.config.probe_timeout).await {
            Ok(_conn) => Some(start.elapsed().as_millis() as u64),
            Err(e) => {
                debug!(target = %target, error = %e, "direct probe failed");
                None
            }
        }
    }

    /// Measure latency through the upstream relay
    ///
    /// Skipped entirely when the tunnel is not running; a probe must
    /// never trigger supervision side effects.
    async fn probe_proxy(&self, target: &TargetAddr) -> Option<u64> {
        if self.tunnel.status() != TunnelStatus::Running {
            debug!(target = %target, "proxy probe skipped, tunnel not running");
            return None;
        }

        let outbound = self.tunnel.outbound();
        let start = Instant::now();
        match outbound.connect(target, self.config.probe_timeout).await {
            Ok(_conn) => Some(start.elapsed().as_millis() as u64),
            Err(e) => {
                debug!(target = %target, error = %e, "proxy probe failed");
                None
            }
        }
    }
}

/// Resolve a rule pattern to a dialable probe host
fn probe_host(pattern: &str) -> String {
    if let Some(host) = PROBE_HOSTS.get(pattern) {
        return (*host).to_string();
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => format!("api.{suffix}"),
        None => pattern.to_string(),
    }
}

// ==================== Speed Tester Tests ====================
