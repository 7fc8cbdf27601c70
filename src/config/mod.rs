//! Configuration module for smart-proxy
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use smart_proxy::config::{load_config, Config};
//!
//! let config = load_config("/etc/smart-proxy/config.json").unwrap();
//! println!("HTTP listener: {}", config.http_listen);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{Config, IpcConfig, LogConfig, RuleSeed, TimeoutConfig, TunnelSettings};
