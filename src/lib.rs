//! smart-proxy: rule-based connection router
//!
//! This crate routes outbound TCP connections from local clients either
//! directly to their destination or through an upstream SOCKS5 tunnel,
//! based on per-domain rules. Only selected traffic traverses the remote
//! relay; everything else stays local.
//!
//! # Features
//!
//! - **Dual Listeners**: HTTP CONNECT and SOCKS5 proxy entry points
//! - **Domain Rules**: Exact and `*.suffix` wildcard patterns, lock-free reads
//! - **Unknown-Domain Fallback**: Direct probe first, at most one tunnel retry
//! - **Tunnel Supervision**: Relay process lifecycle with health probes and
//!   bounded-backoff restarts
//! - **IPC Control**: Unix socket-based runtime control
//! - **Statistics**: Per-domain outcomes and aggregate transfer totals
//!
//! # Architecture
//!
//! ```text
//! Client → HTTP CONNECT / SOCKS5 listener → ConnectionRouter → Direct
//!                                                 ↓               or
//!                                            Rule Matching  → SOCKS5 tunnel
//!                                                 ↓
//!                                           StatsCollector
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use smart_proxy::config::load_config;
//! use smart_proxy::ingress::{HttpProxyServer, HttpServerConfig};
//! use smart_proxy::router::{ConnectionRouter, RouterConfig};
//! use smart_proxy::rules::RuleStore;
//! use smart_proxy::stats::StatsCollector;
//! use smart_proxy::tunnel::UpstreamTunnelManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration
//! let config = load_config("/etc/smart-proxy/config.json")?;
//!
//! // Shared state
//! let rules = Arc::new(RuleStore::new());
//! let stats = Arc::new(StatsCollector::new());
//! let tunnel = Arc::new(UpstreamTunnelManager::new(config.tunnel.to_tunnel_config()));
//!
//! // Router and listener
//! let router = Arc::new(ConnectionRouter::new(rules, tunnel, stats, RouterConfig::default()));
//! let http = HttpProxyServer::new(HttpServerConfig::default(), router);
//! http.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`ingress`]: HTTP CONNECT and SOCKS5 listeners
//! - [`io`]: I/O utilities for bidirectional copy
//! - [`ipc`]: IPC server and protocol
//! - [`outbound`]: Direct and SOCKS5 dialers
//! - [`router`]: Routing policy (rules, probe, fallback)
//! - [`rules`]: Rule store and domain matching
//! - [`speedtest`]: Out-of-band latency probes
//! - [`stats`]: Statistics collection
//! - [`tunnel`]: Upstream tunnel supervision

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod ingress;
pub mod io;
pub mod ipc;
pub mod outbound;
pub mod router;
pub mod rules;
pub mod speedtest;
pub mod stats;
pub mod tunnel;

// Re-export commonly used types at the crate root
pub use config::{Config, RuleSeed, TunnelSettings};
pub use error::{
    ConfigError, IpcError, OutboundError, ProtocolError, RouteError, SmartProxyError,
    SpeedTestError, TunnelError,
};
pub use ingress::{HttpProxyServer, Socks5ProxyServer};
pub use ipc::{IpcClient, IpcCommand, IpcResponse, IpcServer};
pub use outbound::{DirectOutbound, Outbound, Socks5Outbound, TargetAddr};
pub use router::{ConnectionRouter, RouterConfig};
pub use rules::{Decision, DomainMatcher, Rule, RuleAction, RuleStore};
pub use speedtest::{SpeedTestReport, SpeedTester};
pub use stats::{RuleStatus, StatsCollector, TotalsSnapshot};
pub use tunnel::{TunnelConfig, TunnelState, TunnelStatus, UpstreamTunnelManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
