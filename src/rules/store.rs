//! Hot-reloadable rule store
//!
//! The store keeps an immutable [`RuleTable`] behind an `ArcSwap` so
//! the routing hot path reads rules without taking a lock. Mutations
//! are serialized through a write lock and applied copy-on-write: each
//! upsert or remove builds a fresh table and swaps it in atomically.
//!
//! # Architecture
//!
//! ```text
//! Connection -> RuleStore::match_host() -> ArcSwap::load() -> RuleTable
//!                                               |
//!                                        (lock-free read)
//!
//! Management -> RuleStore::upsert() -> write lock -> rebuild -> ArcSwap::store()
//!                                                                    |
//!                                                             (atomic swap)
//! ```
//!
//! A mutation that returns observes its own write: the swap completes
//! before `upsert`/`remove` return, so a follow-up `get` on the same
//! handle sees the new table.
//!
//! # Example
//!
//! ```
//! use smart_proxy::rules::{RuleAction, RuleStore};
//!
//! let store = RuleStore::new();
//! store.upsert("*.example.com", RuleAction::Proxy).unwrap();
//!
//! let rule = store.match_host("cdn.example.com").unwrap();
//! assert_eq!(rule.action, RuleAction::Proxy);
//! assert_eq!(store.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;

use super::matcher::{DomainMatcher, DomainMatcherBuilder};
use super::types::{normalize_host, normalize_pattern, Rule, RuleAction, RuleError};

/// Immutable snapshot of the rule set
///
/// Holds the rules in pattern order plus the compiled matcher. Built
/// once per mutation and shared by readers until the next swap.
#[derive(Debug)]
pub struct RuleTable {
    /// Rules sorted by pattern
    rules: Vec<Rule>,
    /// Compiled matcher over the same rules
    matcher: DomainMatcher,
    /// Monotonic revision, bumped on every mutation
    version: u64,
}

impl RuleTable {
    fn build(map: &BTreeMap<String, RuleAction>, version: u64) -> Self {
        let mut builder = DomainMatcherBuilder::default();
        let mut rules = Vec::with_capacity(map.len());
        for (pattern, action) in map {
            let rule = Rule::new(pattern.clone(), *action);
            builder = builder.add_rule(&rule);
            rules.push(rule);
        }
        Self {
            rules,
            matcher: builder.build(),
            version,
        }
    }

    fn empty() -> Self {
        Self {
            rules: Vec::new(),
            matcher: DomainMatcher::empty(),
            version: 0,
        }
    }

    /// Rules in pattern order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Match a hostname against this snapshot
    #[must_use]
    pub fn match_host(&self, host: &str) -> Option<&Rule> {
        self.matcher.match_host(host)
    }

    /// Revision of this snapshot
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Number of rules in this snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether this snapshot holds no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Shared, hot-reloadable rule store
///
/// Reads are lock-free; writes are serialized so concurrent mutations
/// queue rather than race. Safe to share across tasks behind an `Arc`.
pub struct RuleStore {
    /// Current snapshot (lock-free reads via `ArcSwap`)
    table: ArcSwap<RuleTable>,
    /// Serializes mutations; never held across `.await`
    write_lock: Mutex<()>,
}

impl RuleStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RuleTable::empty()),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store seeded with rules
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidPattern` if any pattern fails
    /// validation; no rules are installed in that case.
    pub fn with_rules<I>(rules: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = Rule>,
    {
        let store = Self::new();
        store.replace_all(rules)?;
        Ok(store)
    }

    /// Get the current snapshot (lock-free read)
    ///
    /// The returned guard keeps the snapshot alive, which is useful
    /// when several lookups must see a consistent rule set.
    pub fn snapshot(&self) -> Guard<Arc<RuleTable>> {
        self.table.load()
    }

    /// Match a hostname against the current rules
    ///
    /// Returns a clone of the matching rule so callers can outlive the
    /// snapshot. Exact rules beat wildcards; among wildcards the
    /// longest suffix wins.
    #[must_use]
    pub fn match_host(&self, host: &str) -> Option<Rule> {
        self.table.load().match_host(host).cloned()
    }

    /// Look up a rule by its literal pattern
    ///
    /// The pattern is normalized before lookup; `*.Example.COM` finds
    /// the rule stored as `*.example.com`.
    #[must_use]
    pub fn get(&self, pattern: &str) -> Option<Rule> {
        let normalized = normalize_host(pattern);
        let table = self.table.load();
        table
            .rules
            .iter()
            .find(|r| r.pattern == normalized)
            .cloned()
    }

    /// List all rules in pattern order
    #[must_use]
    pub fn list(&self) -> Vec<Rule> {
        self.table.load().rules.clone()
    }

    /// Insert or replace a rule
    ///
    /// Idempotent: upserting an existing pattern with the same action
    /// leaves the rule set equivalent (the version still advances).
    /// Returns the stored, normalized rule.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidPattern` if the pattern fails
    /// validation; the rule set is left unchanged.
    pub fn upsert(&self, pattern: &str, action: RuleAction) -> Result<Rule, RuleError> {
        let normalized = normalize_pattern(pattern)?;
        self.mutate(|map| {
            map.insert(normalized.clone(), action);
        });
        Ok(Rule::new(normalized, action))
    }

    /// Remove a rule by pattern
    ///
    /// Returns whether a rule was removed. Removing an absent pattern
    /// is a no-op, not an error.
    pub fn remove(&self, pattern: &str) -> bool {
        let normalized = normalize_host(pattern);
        self.mutate(|map| map.remove(&normalized).is_some())
    }

    /// Replace the entire rule set atomically
    ///
    /// Used at startup to seed rules from configuration. Later rules
    /// win on duplicate patterns. Returns the number of installed
    /// rules.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidPattern` if any pattern fails
    /// validation; the previous rule set stays in place.
    pub fn replace_all<I>(&self, rules: I) -> Result<usize, RuleError>
    where
        I: IntoIterator<Item = Rule>,
    {
        let mut map = BTreeMap::new();
        for rule in rules {
            let normalized = normalize_pattern(&rule.pattern)?;
            map.insert(normalized, rule.action);
        }
        let count = map.len();

        let _guard = self.write_lock.lock();
        let version = self.table.load().version + 1;
        self.table.store(Arc::new(RuleTable::build(&map, version)));
        Ok(count)
    }

    /// Number of rules in the current snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    /// Whether the current snapshot holds no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Revision of the current snapshot
    #[must_use]
    pub fn version(&self) -> u64 {
        self.table.load().version
    }

    /// Apply a mutation copy-on-write under the write lock
    fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BTreeMap<String, RuleAction>) -> R,
    {
        let _guard = self.write_lock.lock();
        let current = self.table.load();
        let mut map: BTreeMap<String, RuleAction> = current
            .rules
            .iter()
            .map(|r| (r.pattern.clone(), r.action))
            .collect();
        let result = f(&mut map);
        let table = RuleTable::build(&map, current.version + 1);
        self.table.store(Arc::new(table));
        result
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.load();
        f.debug_struct("RuleStore")
            .field("rules", &table.len())
            .field("version", &table.version)
            .finish()
    }
}
