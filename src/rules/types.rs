//! Core rule types
//!
//! This module defines the fundamental types for routing rules:
//! - [`RuleAction`]: What to do with a matched connection
//! - [`Rule`]: A pattern/action pair
//! - [`Decision`]: The recorded outcome of routing one connection
//!
//! A pattern is either an exact hostname (`api.example.com`) or a
//! wildcard (`*.example.com`). A wildcard covers the bare domain and
//! every subdomain, but never partial-label matches (`notexample.com`
//! does not match `*.example.com`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing action attached to a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Dial the destination directly
    Direct,
    /// Dial the destination through the upstream tunnel
    Proxy,
}

impl RuleAction {
    /// Parse an action from its string form
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidAction` if the string is neither
    /// "direct" nor "proxy".
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "proxy" => Ok(Self::Proxy),
            _ => Err(RuleError::InvalidAction(s.to_string())),
        }
    }

    /// String form used in logs and stats snapshots
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Proxy => "proxy",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single routing rule
///
/// Patterns are unique within a [`RuleStore`](crate::rules::RuleStore);
/// upserting an existing pattern replaces its action.
///
/// # Examples
///
/// ```
/// use smart_proxy::rules::{Rule, RuleAction};
///
/// let rule = Rule::new("*.example.com", RuleAction::Proxy);
/// assert!(rule.is_wildcard());
/// assert_eq!(rule.action, RuleAction::Proxy);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Exact hostname or `*.suffix` wildcard, normalized to lowercase
    pub pattern: String,

    /// What to do with connections matching this pattern
    pub action: RuleAction,
}

impl Rule {
    /// Create a rule from an already-normalized pattern
    pub fn new(pattern: impl Into<String>, action: RuleAction) -> Self {
        Self {
            pattern: pattern.into(),
            action,
        }
    }

    /// Whether this is a `*.suffix` wildcard rule
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.pattern.starts_with("*.")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.pattern, self.action)
    }
}

/// Recorded routing decision for one client connection
///
/// `FallbackProxy` marks an unknown domain whose direct probe failed
/// and which was then carried over the tunnel. It is distinct from
/// `Proxy` so operators can spot candidates for explicit proxy rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Dialed directly
    Direct,
    /// Dialed through the tunnel because a rule said so
    Proxy,
    /// Unknown domain: direct probe failed, tunnel succeeded
    FallbackProxy,
}

impl Decision {
    /// String form used in logs and stats snapshots
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Proxy => "proxy",
            Self::FallbackProxy => "fallback-proxy",
        }
    }

    /// Whether the connection traversed the upstream tunnel
    #[must_use]
    pub const fn is_proxied(&self) -> bool {
        matches!(self, Self::Proxy | Self::FallbackProxy)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule validation errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Pattern failed validation
    #[error("Invalid rule pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Action string was neither "direct" nor "proxy"
    #[error("Invalid rule action: {0}")]
    InvalidAction(String),
}

impl RuleError {
    pub(crate) fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Normalize a hostname for matching
///
/// Lowercases ASCII and strips trailing dots, so `Example.COM.` and
/// `example.com` compare equal. Ports are the caller's concern.
///
/// # Examples
///
/// ```
/// use smart_proxy::rules::normalize_host;
///
/// assert_eq!(normalize_host("API.Example.COM."), "api.example.com");
/// ```
#[must_use]
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Validate and normalize a rule pattern
///
/// # Errors
///
/// Returns `RuleError::InvalidPattern` for empty patterns, embedded
/// whitespace, or a wildcard with nothing after `*.`. A `*` is only
/// legal as the leading `*.` label.
pub fn normalize_pattern(pattern: &str) -> Result<String, RuleError> {
    let normalized = normalize_host(pattern);

    if normalized.is_empty() {
        return Err(RuleError::invalid_pattern(pattern, "empty pattern"));
    }
    if normalized.chars().any(char::is_whitespace) {
        return Err(RuleError::invalid_pattern(pattern, "contains whitespace"));
    }

    if let Some(suffix) = normalized.strip_prefix("*.") {
        if suffix.is_empty() {
            return Err(RuleError::invalid_pattern(
                pattern,
                "wildcard with empty suffix",
            ));
        }
        if suffix.contains('*') {
            return Err(RuleError::invalid_pattern(
                pattern,
                "wildcard allowed only as leading '*.'",
            ));
        }
    } else if normalized.contains('*') {
        return Err(RuleError::invalid_pattern(
            pattern,
            "wildcard allowed only as leading '*.'",
        ));
    }

    Ok(normalized)
}
