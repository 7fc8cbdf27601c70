//! Configuration types for smart-proxy
//!
//! This module defines all configuration structures used by the router.
//! Configuration is loaded from JSON files and can be validated at startup.
//! Every field has a serde default, so an empty `{}` document yields a
//! working localhost setup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::{normalize_pattern, RuleAction};
use crate::tunnel::TunnelConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// HTTP CONNECT listener address
    #[serde(default = "default_http_listen")]
    pub http_listen: SocketAddr,

    /// SOCKS5 listener address
    #[serde(default = "default_socks5_listen")]
    pub socks5_listen: SocketAddr,

    /// Upper bound on an HTTP request head, in bytes
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// Dial and relay timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Upstream tunnel supervision
    #[serde(default)]
    pub tunnel: TunnelSettings,

    /// Rules loaded into the store at startup
    #[serde(default)]
    pub rules: Vec<RuleSeed>,

    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The two listeners and the tunnel entry must not collide
        if self.http_listen == self.socks5_listen {
            return Err(ConfigError::ValidationError(format!(
                "http_listen and socks5_listen are both {}",
                self.http_listen
            )));
        }
        for (name, addr) in [
            ("http_listen", self.http_listen),
            ("socks5_listen", self.socks5_listen),
        ] {
            if addr == self.tunnel.entry_addr {
                return Err(ConfigError::ValidationError(format!(
                    "{name} collides with the tunnel entry address {addr}"
                )));
            }
        }

        if self.max_header_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_header_bytes must be greater than 0".into(),
            ));
        }

        self.timeouts.validate()?;
        self.tunnel.validate()?;
        self.ipc.validate()?;

        for (index, seed) in self.rules.iter().enumerate() {
            normalize_pattern(&seed.pattern).map_err(|e| {
                ConfigError::ValidationError(format!("rule {index}: {e}"))
            })?;
        }

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            http_listen: default_http_listen(),
            socks5_listen: default_socks5_listen(),
            max_header_bytes: default_max_header_bytes(),
            timeouts: TimeoutConfig::default(),
            tunnel: TunnelSettings::default(),
            rules: Vec::new(),
            ipc: IpcConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Dial and relay timeouts, in whole seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Dial timeout for explicit Direct rules
    #[serde(default = "default_direct_connect_secs")]
    pub direct_connect_secs: u64,

    /// Short direct-probe timeout for unknown domains
    #[serde(default = "default_probe_connect_secs")]
    pub probe_connect_secs: u64,

    /// Dial timeout through the tunnel
    #[serde(default = "default_proxy_connect_secs")]
    pub proxy_connect_secs: u64,

    /// Client handshake deadline on both listeners
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,

    /// Relay idle timeout
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

impl TimeoutConfig {
    /// Validate timeout configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("direct_connect_secs", self.direct_connect_secs),
            ("probe_connect_secs", self.probe_connect_secs),
            ("proxy_connect_secs", self.proxy_connect_secs),
            ("handshake_secs", self.handshake_secs),
            ("idle_secs", self.idle_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Get direct dial timeout as Duration
    #[must_use]
    pub const fn direct_connect(&self) -> Duration {
        Duration::from_secs(self.direct_connect_secs)
    }

    /// Get unknown-domain probe timeout as Duration
    #[must_use]
    pub const fn probe_connect(&self) -> Duration {
        Duration::from_secs(self.probe_connect_secs)
    }

    /// Get tunnel dial timeout as Duration
    #[must_use]
    pub const fn proxy_connect(&self) -> Duration {
        Duration::from_secs(self.proxy_connect_secs)
    }

    /// Get handshake deadline as Duration
    #[must_use]
    pub const fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    /// Get relay idle timeout as Duration
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            direct_connect_secs: default_direct_connect_secs(),
            probe_connect_secs: default_probe_connect_secs(),
            proxy_connect_secs: default_proxy_connect_secs(),
            handshake_secs: default_handshake_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

/// Upstream tunnel supervision settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelSettings {
    /// Local SOCKS5 entry point the relay exposes
    #[serde(default = "default_tunnel_entry")]
    pub entry_addr: SocketAddr,

    /// Relay command argv (e.g. `["ssh", "-N", "-D", "1080", "user@host"]`).
    /// Omit to supervise an externally managed relay.
    #[serde(default)]
    pub relay_command: Option<Vec<String>>,

    /// Username for the entry point, when it requires authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for the entry point
    #[serde(default)]
    pub password: Option<String>,

    /// Start the tunnel at startup
    #[serde(default)]
    pub autostart: bool,

    /// Deadline for individual entry probes, in seconds
    #[serde(default = "default_tunnel_probe_secs")]
    pub probe_timeout_secs: u64,

    /// Interval between health probes while running, in seconds
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Consecutive probe failures before the tunnel is marked failed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Initial restart delay after a failure, in seconds
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on the restart delay, in seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// How long a start waits for the entry port to accept, in seconds
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

impl TunnelSettings {
    /// Validate tunnel settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref command) = self.relay_command {
            if command.is_empty() {
                return Err(ConfigError::ValidationError(
                    "relay_command must not be an empty list".into(),
                ));
            }
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::ValidationError(
                "tunnel username and password must be set together".into(),
            ));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("health_interval_secs", self.health_interval_secs),
            ("backoff_base_secs", self.backoff_base_secs),
            ("start_timeout_secs", self.start_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.backoff_base_secs > self.backoff_cap_secs {
            return Err(ConfigError::ValidationError(format!(
                "backoff_base_secs ({}) exceeds backoff_cap_secs ({})",
                self.backoff_base_secs, self.backoff_cap_secs
            )));
        }

        Ok(())
    }

    /// Convert to the supervisor's config type
    #[must_use]
    pub fn to_tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            local_addr: self.entry_addr,
            relay_command: self.relay_command.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connect_timeout: Duration::from_secs(self.probe_timeout_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
            failure_threshold: self.failure_threshold,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            start_timeout: Duration::from_secs(self.start_timeout_secs),
        }
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            entry_addr: default_tunnel_entry(),
            relay_command: None,
            username: None,
            password: None,
            autostart: false,
            probe_timeout_secs: default_tunnel_probe_secs(),
            health_interval_secs: default_health_interval_secs(),
            failure_threshold: default_failure_threshold(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }
}

/// A rule loaded into the store at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSeed {
    /// Exact hostname or `*.suffix` wildcard
    pub pattern: String,

    /// Routing action for matching hosts
    pub action: RuleAction,
}

/// IPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file permissions (octal)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            target: true,
        }
    }
}

// Default value functions for serde

fn default_http_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8118)
}

fn default_socks5_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8119)
}

fn default_tunnel_entry() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1080)
}

const fn default_max_header_bytes() -> usize {
    16 * 1024
}

const fn default_true() -> bool {
    true
}

const fn default_direct_connect_secs() -> u64 {
    10
}

const fn default_probe_connect_secs() -> u64 {
    3
}

const fn default_proxy_connect_secs() -> u64 {
    10
}

const fn default_handshake_secs() -> u64 {
    10
}

const fn default_idle_secs() -> u64 {
    300
}

const fn default_tunnel_probe_secs() -> u64 {
    5
}

const fn default_health_interval_secs() -> u64 {
    30
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_backoff_base_secs() -> u64 {
    1
}

const fn default_backoff_cap_secs() -> u64 {
    60
}

const fn default_start_timeout_secs() -> u64 {
    15
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/smart-proxy.sock")
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
