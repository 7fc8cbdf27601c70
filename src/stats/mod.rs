//! Traffic statistics collection
//!
//! Aggregate counters live in atomics; per-domain records live behind a
//! single `RwLock` so writers serialize and readers clone snapshots.
//! Nothing here feeds back into routing: [`RuleStatus`] is
//! informational only and never creates or changes rules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::rules::{normalize_host, Decision};

/// Per-domain routing record, keyed by the hostname actually observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStatus {
    /// Normalized hostname
    pub domain: String,
    /// Connections routed for this domain (failures included)
    pub hit_count: u64,
    /// Decision of the most recent connection
    pub last_decision: Option<Decision>,
    /// Establishment latency of the most recent connection
    pub last_latency_ms: u64,
    /// Last measured direct latency, from the speed tester
    pub direct_speed_ms: Option<u64>,
    /// Last measured proxied latency, from the speed tester
    pub proxy_speed_ms: Option<u64>,
}

impl RuleStatus {
    fn new(domain: String) -> Self {
        Self {
            domain,
            hit_count: 0,
            last_decision: None,
            last_latency_ms: 0,
            direct_speed_ms: None,
            proxy_speed_ms: None,
        }
    }
}

/// Snapshot of the aggregate counters at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalsSnapshot {
    /// All recorded connections, including failures
    pub total_connections: u64,
    /// Connections that went direct
    pub direct_connections: u64,
    /// Connections that went through the tunnel by rule
    pub proxy_connections: u64,
    /// Unknown-domain connections that fell back to the tunnel
    pub fallback_connections: u64,
    /// Connections that failed to establish
    pub failed_connections: u64,
    /// Bytes relayed client -> destination
    pub bytes_up: u64,
    /// Bytes relayed destination -> client
    pub bytes_down: u64,
    /// Snapshot timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl TotalsSnapshot {
    /// Total bytes relayed in both directions
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }

    /// Share of connections that established, as a percentage
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_connections == 0 {
            100.0
        } else {
            let ok = self.total_connections - self.failed_connections;
            (ok as f64 / self.total_connections as f64) * 100.0
        }
    }
}

/// Collects routing outcomes and transfer totals
///
/// Shared behind an `Arc` by the router, the speed tester, and the
/// management surface.
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_connections: AtomicU64,
    direct_connections: AtomicU64,
    proxy_connections: AtomicU64,
    fallback_connections: AtomicU64,
    failed_connections: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    domains: RwLock<HashMap<String, RuleStatus>>,
}

impl StatsCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one routed connection outcome
    ///
    /// Called exactly once per client connection. Failures count toward
    /// `failed_connections` and still update the domain record, with
    /// the latency measuring time-to-failure.
    pub fn record(&self, domain: &str, decision: Decision, latency: Duration, success: bool) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        if success {
            match decision {
                Decision::Direct => &self.direct_connections,
                Decision::Proxy => &self.proxy_connections,
                Decision::FallbackProxy => &self.fallback_connections,
            }
            .fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_connections.fetch_add(1, Ordering::Relaxed);
        }

        let key = normalize_host(domain);
        let latency_ms = latency.as_millis() as u64;

        let mut domains = self.domains.write();
        let status = domains
            .entry(key.clone())
            .or_insert_with(|| RuleStatus::new(key));
        status.hit_count += 1;
        status.last_decision = Some(decision);
        status.last_latency_ms = latency_ms;
    }

    /// Add relayed byte counts to the totals
    pub fn add_transfer(&self, bytes_up: u64, bytes_down: u64) {
        self.bytes_up.fetch_add(bytes_up, Ordering::Relaxed);
        self.bytes_down.fetch_add(bytes_down, Ordering::Relaxed);
    }

    /// Record speed-test results for a domain
    ///
    /// `None` means the corresponding probe failed; the previous
    /// measurement is overwritten either way.
    pub fn record_speed(&self, domain: &str, direct_ms: Option<u64>, proxy_ms: Option<u64>) {
        let key = normalize_host(domain);
        let mut domains = self.domains.write();
        let status = domains
            .entry(key.clone())
            .or_insert_with(|| RuleStatus::new(key));
        status.direct_speed_ms = direct_ms;
        status.proxy_speed_ms = proxy_ms;
    }

    /// Snapshot the aggregate counters
    #[must_use]
    pub fn totals(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            direct_connections: self.direct_connections.load(Ordering::Relaxed),
            proxy_connections: self.proxy_connections.load(Ordering::Relaxed),
            fallback_connections: self.fallback_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// All per-domain records, sorted by domain
    #[must_use]
    pub fn per_domain(&self) -> Vec<RuleStatus> {
        let domains = self.domains.read();
        let mut records: Vec<RuleStatus> = domains.values().cloned().collect();
        records.sort_by(|a, b| a.domain.cmp(&b.domain));
        records
    }

    /// Record for a single domain
    #[must_use]
    pub fn domain(&self, host: &str) -> Option<RuleStatus> {
        self.domains.read().get(&normalize_host(host)).cloned()
    }

    /// Number of domains with records
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.domains.read().len()
    }

    /// Clear the aggregates and every per-domain record
    pub fn reset(&self) {
        self.total_connections.store(0, Ordering::Relaxed);
        self.direct_connections.store(0, Ordering::Relaxed);
        self.proxy_connections.store(0, Ordering::Relaxed);
        self.fallback_connections.store(0, Ordering::Relaxed);
        self.failed_connections.store(0, Ordering::Relaxed);
        self.bytes_up.store(0, Ordering::Relaxed);
        self.bytes_down.store(0, Ordering::Relaxed);
        self.domains.write().clear();
    }
}
