//! Shared SOCKS5 protocol constants (RFC 1928, RFC 1929)
//!
//! Used by both the upstream SOCKS5 client in
//! [`socks5`](crate::outbound::socks5) and the local SOCKS5 listener in
//! [`ingress`](crate::ingress). Keeping one set of constants avoids the
//! two sides drifting apart.

// ============================================================================
// Protocol Version
// ============================================================================

/// SOCKS5 protocol version (RFC 1928)
pub const SOCKS5_VERSION: u8 = 0x05;

// ============================================================================
// Authentication Methods (RFC 1928 Section 3)
// ============================================================================

/// No authentication required (0x00)
pub const AUTH_METHOD_NONE: u8 = 0x00;

/// Username/password authentication - RFC 1929 (0x02)
pub const AUTH_METHOD_PASSWORD: u8 = 0x02;

/// No acceptable methods (0xFF) - server rejects all offered methods
pub const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// Username/password auth sub-negotiation version (RFC 1929)
pub const AUTH_PASSWORD_VERSION: u8 = 0x01;

// ============================================================================
// Commands (RFC 1928 Section 4)
// ============================================================================

/// CONNECT command (0x01) - establish TCP connection
pub const CMD_CONNECT: u8 = 0x01;

/// BIND command (0x02) - not supported by this router
pub const CMD_BIND: u8 = 0x02;

/// UDP ASSOCIATE command (0x03) - not supported by this router
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// ============================================================================
// Address Types (RFC 1928 Section 4)
// ============================================================================

/// IPv4 address (4 bytes)
pub const ATYP_IPV4: u8 = 0x01;

/// Domain name (1 byte length + N bytes name)
pub const ATYP_DOMAIN: u8 = 0x03;

/// IPv6 address (16 bytes)
pub const ATYP_IPV6: u8 = 0x04;

// ============================================================================
// Reply Codes (RFC 1928 Section 6)
// ============================================================================

/// Succeeded (0x00)
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// General SOCKS server failure (0x01)
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;

/// Connection not allowed by ruleset (0x02)
pub const REPLY_NOT_ALLOWED: u8 = 0x02;

/// Network unreachable (0x03)
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;

/// Host unreachable (0x04)
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;

/// Connection refused (0x05)
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;

/// TTL expired (0x06)
pub const REPLY_TTL_EXPIRED: u8 = 0x06;

/// Command not supported (0x07)
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Address type not supported (0x08)
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Maximum length of a domain name in a SOCKS5 address (1-byte length)
pub const MAX_DOMAIN_LEN: usize = 255;

// ============================================================================
// Utility Functions
// ============================================================================

/// Convert reply code to human-readable message
#[must_use]
pub const fn reply_message(code: u8) -> &'static str {
    match code {
        REPLY_SUCCEEDED => "succeeded",
        REPLY_GENERAL_FAILURE => "general SOCKS server failure",
        REPLY_NOT_ALLOWED => "connection not allowed by ruleset",
        REPLY_NETWORK_UNREACHABLE => "network unreachable",
        REPLY_HOST_UNREACHABLE => "host unreachable",
        REPLY_CONNECTION_REFUSED => "connection refused",
        REPLY_TTL_EXPIRED => "TTL expired",
        REPLY_COMMAND_NOT_SUPPORTED => "command not supported",
        REPLY_ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
        _ => "unknown error",
    }
}
