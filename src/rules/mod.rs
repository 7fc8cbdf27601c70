//! Routing rules: types, matching, and the hot-reloadable store
//!
//! This module decides where outbound connections go:
//! - [`types`]: rule and decision types plus pattern validation
//! - [`matcher`]: exact and wildcard hostname matching
//! - [`store`]: copy-on-write rule store with lock-free reads
//!
//! # Example
//!
//! ```
//! use smart_proxy::rules::{RuleAction, RuleStore};
//!
//! let store = RuleStore::new();
//! store.upsert("*.internal.corp", RuleAction::Direct).unwrap();
//! store.upsert("*.blocked.example", RuleAction::Proxy).unwrap();
//!
//! assert_eq!(
//!     store.match_host("git.internal.corp").map(|r| r.action),
//!     Some(RuleAction::Direct)
//! );
//! ```

pub mod matcher;
pub mod store;
pub mod types;

pub use matcher::{DomainMatcher, DomainMatcherBuilder};
pub use store::{RuleStore, RuleTable};
pub use types::{normalize_host, normalize_pattern, Decision, Rule, RuleAction, RuleError};
