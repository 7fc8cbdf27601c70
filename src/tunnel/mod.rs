//! Upstream tunnel supervision
//!
//! The proxied path runs through an external relay exposing a local
//! SOCKS5 entry point. [`UpstreamTunnelManager`] owns that relay's
//! lifecycle: spawn, readiness, health probing, restart with backoff,
//! and shutdown.
//!
//! # Quick Start
//!
//! ```no_run
//! use smart_proxy::tunnel::{TunnelConfig, UpstreamTunnelManager};
//!
//! # async fn example() {
//! let config = TunnelConfig {
//!     local_addr: "127.0.0.1:1080".parse().unwrap(),
//!     relay_command: Some(vec![
//!         "ssh".into(), "-N".into(), "-D".into(), "1080".into(), "relay".into(),
//!     ]),
//!     ..TunnelConfig::default()
//! };
//!
//! let manager = UpstreamTunnelManager::new(config);
//! manager.start().await;
//!
//! if manager.is_running() {
//!     let outbound = manager.outbound();
//!     // hand the outbound to the router
//! }
//! # }
//! ```

pub mod manager;

pub use manager::{
    TunnelConfig, TunnelState, TunnelStatus, UpstreamTunnelManager, DEFAULT_FAILURE_THRESHOLD,
};
