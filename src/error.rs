//! Error types for smart-proxy
//!
//! This module defines the error hierarchy for the rule-based connection
//! router. Errors are categorized by subsystem and include recovery hints.

use std::io;

use thiserror::Error;

/// Top-level error type for smart-proxy
#[derive(Debug, Error)]
pub enum SmartProxyError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client protocol errors (malformed CONNECT / SOCKS5 handshake)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Outbound dial errors
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),

    /// Routing errors
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Tunnel supervision errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Speed probe errors
    #[error("Speed test error: {0}")]
    SpeedTest(#[from] SpeedTestError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SmartProxyError {
    /// Check if this error is recoverable (the operation can be retried)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Protocol(e) => e.is_recoverable(),
            Self::Outbound(e) => e.is_recoverable(),
            Self::Route(e) => e.is_recoverable(),
            Self::Tunnel(e) => e.is_recoverable(),
            Self::SpeedTest(e) => e.is_recoverable(),
            Self::Ipc(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Client protocol errors
///
/// A malformed handshake is rejected and the connection closed; it is
/// never retried on the server side.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request line could not be parsed
    #[error("Malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// HTTP method other than CONNECT
    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    /// Request headers exceeded the read limit
    #[error("Request headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },

    /// CONNECT target was not a valid host:port
    #[error("Invalid connect target: {target}")]
    InvalidTarget { target: String },

    /// SOCKS version byte mismatch
    #[error("Invalid SOCKS version: expected {expected:#04x}, got {actual:#04x}")]
    InvalidVersion { expected: u8, actual: u8 },

    /// Client offered no acceptable authentication method
    #[error("No acceptable SOCKS5 authentication method")]
    NoAcceptableAuthMethod,

    /// SOCKS5 command other than CONNECT (BIND, UDP ASSOCIATE)
    #[error("Unsupported SOCKS5 command: {command:#04x}")]
    UnsupportedCommand { command: u8 },

    /// Unknown SOCKS5 address type
    #[error("Unsupported SOCKS5 address type: {atyp:#04x}")]
    UnsupportedAddressType { atyp: u8 },

    /// Handshake did not complete within the configured deadline
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// I/O error during the handshake
    #[error("Handshake I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ProtocolError {
    /// Protocol errors terminate the client connection; nothing to retry
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a malformed request error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create an invalid target error
    pub fn invalid_target(target: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
        }
    }
}

/// Outbound dial errors
///
/// These cover both the direct dialer and the upstream SOCKS5 client.
/// A dial error is retried at most once, and only via the
/// unknown-domain fallback path.
#[derive(Debug, Error)]
pub enum OutboundError {
    /// TCP connection failed
    #[error("Failed to connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// Connection attempt exceeded its deadline
    #[error("Connection to {target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    /// DNS resolution produced no usable address
    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// Upstream relay refused the CONNECT
    #[error("Upstream relay replied {code:#04x}: {message}")]
    UpstreamReply { code: u8, message: &'static str },

    /// Upstream relay spoke something other than SOCKS5
    #[error("Upstream relay protocol error: {0}")]
    UpstreamProtocol(String),

    /// Failed to set a socket option
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// I/O error during connection setup
    #[error("Outbound I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl OutboundError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::Resolve { .. } => true,
            Self::UpstreamReply { .. } => true,
            Self::UpstreamProtocol(_) => false,
            Self::SocketOption { .. } => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Whether the failure was a refused connection (vs unreachable/timeout)
    #[must_use]
    pub fn is_refused(&self) -> bool {
        match self {
            Self::ConnectionFailed { reason, .. } => reason.contains("refused"),
            Self::IoError(e) => e.kind() == io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Whether the failure was a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Create a connection failed error
    pub fn connection_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(target: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            target: target.into(),
            timeout_secs,
        }
    }

    /// Create a resolve error
    pub fn resolve(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolve {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Routing errors surfaced to the protocol listeners
#[derive(Debug, Error)]
pub enum RouteError {
    /// A proxy decision was made while the tunnel is not running
    #[error("Tunnel unavailable (status: {status})")]
    TunnelUnavailable { status: String },

    /// The outbound dial failed (direct or via upstream)
    #[error(transparent)]
    Dial(#[from] OutboundError),

    /// Mid-stream relay failure after both ends were established
    #[error("Relay error: {0}")]
    Relay(io::Error),
}

impl RouteError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Recovers once the tunnel supervisor reconnects
            Self::TunnelUnavailable { .. } => true,
            Self::Dial(e) => e.is_recoverable(),
            // The client-visible connection cannot be resumed
            Self::Relay(_) => false,
        }
    }

    /// Create a tunnel unavailable error
    pub fn tunnel_unavailable(status: impl Into<String>) -> Self {
        Self::TunnelUnavailable {
            status: status.into(),
        }
    }
}

/// Tunnel supervision errors
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Relay child process could not be spawned
    #[error("Failed to spawn relay command '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    /// Local entry port never started accepting connections
    #[error("Tunnel entry {addr} not accepting after {waited_secs}s")]
    EntryNotReady { addr: String, waited_secs: u64 },

    /// Relay child process exited while the tunnel was supposed to run
    #[error("Relay process exited: {reason}")]
    RelayExited { reason: String },

    /// Supervisor task did not stop within the shutdown grace period
    #[error("Tunnel supervisor did not stop in time")]
    StopTimeout,

    /// I/O error while supervising the tunnel
    #[error("Tunnel I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TunnelError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SpawnFailed { .. } => false,
            Self::EntryNotReady { .. } => true,
            Self::RelayExited { .. } => true,
            Self::StopTimeout => false,
            Self::IoError(_) => true,
        }
    }

    /// Create a spawn failure error
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Speed probe errors
#[derive(Debug, Error)]
pub enum SpeedTestError {
    /// The pattern was probed too recently
    #[error("Speed test for {pattern} on cooldown ({remaining_secs}s remaining)")]
    Cooldown {
        pattern: String,
        remaining_secs: u64,
    },

    /// The pattern cannot be turned into a dialable host
    #[error("Cannot probe {pattern}: {reason}")]
    InvalidProbeTarget { pattern: String, reason: String },
}

impl SpeedTestError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            // Waiting out the cooldown clears it
            Self::Cooldown { .. } => true,
            Self::InvalidProbeTarget { .. } => false,
        }
    }
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } => false,
            Self::BindError { .. } => false,
            Self::ConnectionError(_) => true,
            Self::ProtocolError(_) => true,
            Self::SerializationError(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}

/// Type alias for Result with SmartProxyError
pub type Result<T> = std::result::Result<T, SmartProxyError>;
