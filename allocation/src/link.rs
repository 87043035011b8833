//! Link groups
//!
//! Accounts that share one capacity limit register the same [`LinkKey`]
//! with a [`LinkRegistry`]. Every member holds the same [`LinkRecord`],
//! so all tree positions referencing any member observe one shared
//! remaining limit.

use crate::types::{AccountId, Bound};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identifies a link group: who owns the shared limit and which
/// constraint it is (e.g. a contributor's registered-plan room)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    /// Owner of the shared limit
    pub owner: String,
    /// Name of the shared constraint
    pub token: String,
}

impl LinkKey {
    /// Create new link key
    pub fn new(owner: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.token)
    }
}

/// Shared state of one link group
#[derive(Debug)]
pub struct LinkRecord {
    key: LinkKey,
    members: RwLock<BTreeSet<AccountId>>,
    limit: RwLock<Bound>,
}

impl LinkRecord {
    fn new(key: LinkKey) -> Self {
        Self {
            key,
            members: RwLock::new(BTreeSet::new()),
            limit: RwLock::new(Bound::Unbounded),
        }
    }

    /// Key of this group
    pub fn key(&self) -> &LinkKey {
        &self.key
    }

    /// Current members
    pub fn members(&self) -> Vec<AccountId> {
        self.members.read().iter().cloned().collect()
    }

    /// Whether `account` is a member
    pub fn contains(&self, account: &AccountId) -> bool {
        self.members.read().contains(account)
    }

    /// Remaining shared limit (magnitude)
    pub fn limit(&self) -> Bound {
        *self.limit.read()
    }

    /// Replace the remaining shared limit
    pub fn set_limit(&self, limit: Bound) {
        *self.limit.write() = limit.abs();
    }

    /// Reduce the remaining limit by `amount`, flooring at zero
    pub fn consume(&self, amount: Decimal) {
        let mut limit = self.limit.write();
        let remaining = limit.saturating_sub(amount.abs());
        *limit = remaining;
        debug!(link = %self.key, consumed = %amount.abs(), %remaining, "Link limit consumed");
    }
}

/// Registry of link groups keyed by (owner, token)
#[derive(Debug, Default)]
pub struct LinkRegistry {
    records: RwLock<HashMap<LinkKey, Arc<LinkRecord>>>,
}

impl LinkRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `account` to the group identified by `key`, creating the
    /// group (with an unbounded limit) on first registration
    pub fn register(&self, key: LinkKey, account: &AccountId) -> Arc<LinkRecord> {
        let mut records = self.records.write();
        let record = records
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(link = %key, "Link group created");
                Arc::new(LinkRecord::new(key))
            })
            .clone();
        record.members.write().insert(account.clone());
        record
    }

    /// Remove `account` from the group; the group is destroyed when its
    /// last member leaves
    pub fn unregister(&self, key: &LinkKey, account: &AccountId) {
        let mut records = self.records.write();
        let empty = match records.get(key) {
            Some(record) => {
                let mut members = record.members.write();
                members.remove(account);
                members.is_empty()
            }
            None => return,
        };
        if empty {
            records.remove(key);
            debug!(link = %key, "Link group destroyed");
        }
    }

    /// Look up a group
    pub fn get(&self, key: &LinkKey) -> Option<Arc<LinkRecord>> {
        self.records.read().get(key).cloned()
    }

    /// Number of live groups
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no groups exist
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
