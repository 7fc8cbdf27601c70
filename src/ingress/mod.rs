//! Inbound proxy listeners
//!
//! This module provides the two local listeners that feed the
//! [`ConnectionRouter`](crate::router::ConnectionRouter): an HTTP
//! CONNECT proxy and a SOCKS5 proxy. Both follow the same shape: a
//! watch-shutdown accept loop, one spawned task per connection, a
//! handshake deadline, and per-listener counters.
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                        smart-proxy                         |
//! |                                                            |
//! |  +-------------------+        +------------------------+   |
//! |  | HttpProxyServer   |        | Socks5ProxyServer      |   |
//! |  | CONNECT host:port |        | greeting + CONNECT     |   |
//! |  +-------------------+        +------------------------+   |
//! |            |                              |                |
//! |            +---------------+--------------+                |
//! |                            |                               |
//! |                 +---------------------+                    |
//! |                 | ConnectionRouter    |                    |
//! |                 | direct / proxy /    |                    |
//! |                 | probe-and-fallback  |                    |
//! |                 +---------------------+                    |
//! +------------------------------------------------------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use smart_proxy::ingress::{HttpProxyServer, HttpServerConfig};
//! use smart_proxy::router::{ConnectionRouter, RouterConfig};
//! use smart_proxy::rules::RuleStore;
//! use smart_proxy::stats::StatsCollector;
//! use smart_proxy::tunnel::{TunnelConfig, UpstreamTunnelManager};
//!
//! # async fn example() -> std::io::Result<()> {
//! let router = Arc::new(ConnectionRouter::new(
//!     Arc::new(RuleStore::new()),
//!     Arc::new(UpstreamTunnelManager::new(TunnelConfig::default())),
//!     Arc::new(StatsCollector::new()),
//!     RouterConfig::default(),
//! ));
//!
//! let server = HttpProxyServer::new(HttpServerConfig::default(), router);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod http_server;
pub mod socks5_server;

// Re-export commonly used types
pub use http_server::{HttpProxyServer, HttpServerConfig, HttpServerStats, HttpServerStatsSnapshot};
pub use socks5_server::{
    Socks5ProxyServer, Socks5ServerConfig, Socks5ServerStats, Socks5ServerStatsSnapshot,
};
