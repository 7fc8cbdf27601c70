//! IPC Protocol definitions
//!
//! This module defines the command and response types used for
//! inter-process communication via Unix socket.

use serde::{Deserialize, Serialize};

use crate::rules::{Rule, RuleAction};
use crate::speedtest::SpeedTestReport;
use crate::stats::{RuleStatus, TotalsSnapshot};
use crate::tunnel::{TunnelState, TunnelStatus};

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get server status
    Status,

    /// List all routing rules
    ListRules,

    /// Get a single rule by pattern
    GetRule {
        /// Exact hostname or `*.suffix` wildcard
        pattern: String,
    },

    /// Add a rule, or replace the action of an existing one
    UpsertRule {
        /// Exact hostname or `*.suffix` wildcard
        pattern: String,
        /// Routing action for matching hosts
        action: RuleAction,
    },

    /// Remove a rule
    ///
    /// Removing an absent pattern is not an error.
    RemoveRule {
        /// Pattern to remove
        pattern: String,
    },

    /// Start the upstream tunnel
    TunnelStart,

    /// Stop the upstream tunnel
    TunnelStop,

    /// Get the tunnel state
    TunnelStatus,

    /// Get aggregate traffic statistics
    GetStats,

    /// Get per-domain statistics
    GetDomainStats {
        /// Restrict to one host (all domains when omitted)
        #[serde(default)]
        host: Option<String>,
    },

    /// Clear aggregate counters and per-domain records
    ResetStats,

    /// Probe direct and proxied latency for a domain
    SpeedTest {
        /// Rule pattern or hostname to probe
        pattern: String,
    },
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Ping response
    Pong,

    /// Status response
    Status(ServerStatus),

    /// Rule list response
    Rules {
        /// All rules, sorted by pattern
        rules: Vec<Rule>,
        /// Rule table version
        version: u64,
    },

    /// Single rule response
    Rule(Rule),

    /// Tunnel state response
    Tunnel(TunnelState),

    /// Aggregate statistics response
    Stats(TotalsSnapshot),

    /// Per-domain statistics response
    DomainStats {
        /// Per-domain records
        domains: Vec<RuleStatus>,
    },

    /// Speed test response
    SpeedTestResult(SpeedTestReport),

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(IpcError),
}

impl IpcResponse {
    /// Create a success response with no message
    #[must_use]
    pub const fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(IpcError {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Server status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Current tunnel lifecycle state
    pub tunnel: TunnelStatus,
    /// Number of rules in the store
    pub rule_count: usize,
    /// Rule table version (incremented on each mutation)
    pub rules_version: u64,
    /// Total connections handled
    pub total_connections: u64,
    /// Number of domains with statistics records
    pub tracked_domains: usize,
}

/// IPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    /// Error code
    pub code: ErrorCode,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for IpcError {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unknown error
    Unknown,
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Resource not found
    NotFound,
    /// Operation failed
    OperationFailed,
    /// Internal error
    InternalError,
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a length-prefixed message
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
