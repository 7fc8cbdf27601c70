//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed, or if
/// validation fails.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        http_listen = %config.http_listen,
        socks5_listen = %config.socks5_listen,
        rules = config.rules.len(),
        "Configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `SMART_PROXY_HTTP_LISTEN`: Override HTTP CONNECT listener address
/// - `SMART_PROXY_SOCKS5_LISTEN`: Override SOCKS5 listener address
/// - `SMART_PROXY_TUNNEL_ADDR`: Override upstream tunnel entry address
/// - `SMART_PROXY_IPC_SOCKET`: Override IPC socket path
/// - `SMART_PROXY_LOG_LEVEL`: Override log level
///
/// # Errors
///
/// Returns `ConfigError` if loading fails or an override does not parse.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    // Override HTTP listener
    if let Ok(addr) = std::env::var("SMART_PROXY_HTTP_LISTEN") {
        config.http_listen = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "SMART_PROXY_HTTP_LISTEN".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("HTTP listener overridden to {}", config.http_listen);
    }

    // Override SOCKS5 listener
    if let Ok(addr) = std::env::var("SMART_PROXY_SOCKS5_LISTEN") {
        config.socks5_listen = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "SMART_PROXY_SOCKS5_LISTEN".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("SOCKS5 listener overridden to {}", config.socks5_listen);
    }

    // Override tunnel entry address
    if let Ok(addr) = std::env::var("SMART_PROXY_TUNNEL_ADDR") {
        config.tunnel.entry_addr = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "SMART_PROXY_TUNNEL_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Tunnel entry overridden to {}", config.tunnel.entry_addr);
    }

    // Override IPC socket path
    if let Ok(socket) = std::env::var("SMART_PROXY_IPC_SOCKET") {
        config.ipc.socket_path = socket.into();
        debug!("IPC socket path overridden to {:?}", config.ipc.socket_path);
    }

    // Override log level
    if let Ok(level) = std::env::var("SMART_PROXY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
