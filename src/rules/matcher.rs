//! Domain matcher for routing decisions
//!
//! Supports two match types with different precedence:
//!
//! - **Exact match**: O(1) hash lookup, highest priority
//! - **Wildcard match**: `*.suffix` patterns, longest suffix wins
//!
//! Wildcard matching walks the hostname's labels from most to least
//! specific, so `a.b.example.com` checks `a.b.example.com`,
//! `b.example.com`, `example.com`, then `com`. The first hit is by
//! construction the matching suffix with the most labels. A wildcard
//! covers the bare domain itself and never crosses label boundaries
//! (`notexample.com` does not match `*.example.com`).
//!
//! # Example
//!
//! ```
//! use smart_proxy::rules::{DomainMatcher, RuleAction};
//!
//! let matcher = DomainMatcher::builder()
//!     .add_exact("api.example.com", RuleAction::Direct)
//!     .add_wildcard("*.example.com", RuleAction::Proxy)
//!     .build();
//!
//! assert_eq!(
//!     matcher.match_host("api.example.com").map(|r| r.action),
//!     Some(RuleAction::Direct)
//! );
//! assert_eq!(
//!     matcher.match_host("cdn.example.com").map(|r| r.action),
//!     Some(RuleAction::Proxy)
//! );
//! assert!(matcher.match_host("example.org").is_none());
//! ```

use std::collections::HashMap;

use super::types::{normalize_host, Rule, RuleAction};

/// Immutable compiled matcher over a set of rules
///
/// Built once per rule-set revision and shared behind an
/// [`ArcSwap`](arc_swap::ArcSwap) by the store, so lookups never take
/// a lock.
#[derive(Debug, Default)]
pub struct DomainMatcher {
    /// Exact hostname to rule mapping (O(1) lookup)
    exact: HashMap<String, Rule>,

    /// Wildcard rules keyed by bare suffix (pattern minus the `*.`)
    wildcard: HashMap<String, Rule>,
}

impl DomainMatcher {
    /// Create a new builder for constructing a `DomainMatcher`
    #[must_use]
    pub fn builder() -> DomainMatcherBuilder {
        DomainMatcherBuilder::default()
    }

    /// Create an empty matcher that matches nothing
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Match a hostname against all rules
    ///
    /// Returns the matching rule, or `None` if the host is unknown.
    /// Exact rules beat wildcards; among wildcards the longest suffix
    /// (most labels) wins. Input is normalized (lowercase, trailing
    /// dots stripped) before matching.
    #[must_use]
    pub fn match_host(&self, host: &str) -> Option<&Rule> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }

        if let Some(rule) = self.exact.get(host.as_str()) {
            return Some(rule);
        }

        // Walk suffixes from most to least specific. A wildcard covers
        // the bare domain, so the walk starts at the full hostname.
        let mut rest = host.as_str();
        loop {
            if let Some(rule) = self.wildcard.get(rest) {
                return Some(rule);
            }
            match rest.split_once('.') {
                Some((_, tail)) if !tail.is_empty() => rest = tail,
                _ => return None,
            }
        }
    }

    /// Number of exact rules
    #[must_use]
    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    /// Number of wildcard rules
    #[must_use]
    pub fn wildcard_count(&self) -> usize {
        self.wildcard.len()
    }

    /// Total number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    /// Whether the matcher has no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

/// Builder for constructing a `DomainMatcher`
///
/// Patterns are expected to be normalized already (the store runs
/// [`normalize_pattern`](crate::rules::normalize_pattern) before rules
/// reach the matcher). Duplicate patterns keep the last rule added.
#[derive(Debug, Default)]
pub struct DomainMatcherBuilder {
    exact: HashMap<String, Rule>,
    wildcard: HashMap<String, Rule>,
}

impl DomainMatcherBuilder {
    /// Add an exact hostname rule
    #[must_use]
    pub fn add_exact(mut self, pattern: impl Into<String>, action: RuleAction) -> Self {
        let pattern = normalize_host(&pattern.into());
        self.exact
            .insert(pattern.clone(), Rule::new(pattern, action));
        self
    }

    /// Add a `*.suffix` wildcard rule
    ///
    /// Accepts the pattern with or without the leading `*.`.
    #[must_use]
    pub fn add_wildcard(mut self, pattern: impl Into<String>, action: RuleAction) -> Self {
        let pattern = normalize_host(&pattern.into());
        let suffix = pattern.strip_prefix("*.").unwrap_or(&pattern).to_string();
        let rule = Rule::new(format!("*.{suffix}"), action);
        self.wildcard.insert(suffix, rule);
        self
    }

    /// Add an already-normalized rule, dispatching on its pattern form
    #[must_use]
    pub fn add_rule(self, rule: &Rule) -> Self {
        if let Some(suffix) = rule.pattern.strip_prefix("*.") {
            self.add_wildcard(format!("*.{suffix}"), rule.action)
        } else {
            self.add_exact(rule.pattern.clone(), rule.action)
        }
    }

    /// Build the immutable matcher
    #[must_use]
    pub fn build(self) -> DomainMatcher {
        DomainMatcher {
            exact: self.exact,
            wildcard: self.wildcard,
        }
    }
}
