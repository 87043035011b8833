//! Link resolution
//!
//! Reads every account's capacity once per call and partitions the
//! accounts into shared-limit pools.

use crate::account::{limits, AccountHandle};
use crate::link::LinkKey;
use crate::timing::Timing;
use crate::tree::PriorityTree;
use crate::types::{AccountId, Bound, LimitKind, LimitSchedule, Polarity, Time};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Index of a pool within a snapshot
pub type PoolId = usize;

/// Accounts sharing one limit for one kind
#[derive(Debug, Clone)]
pub struct LinkPool {
    /// Group key
    pub key: LinkKey,
    /// Capacity kind the members share
    pub kind: LimitKind,
    /// Members, in first-appearance order
    pub members: Vec<AccountId>,
    /// Shared remaining limit (magnitude)
    pub limit: Bound,
}

/// Partition `accounts` by their link for `kind`. Unlinked accounts are
/// implicit singletons and don't appear in the result.
pub fn partition(accounts: &[AccountHandle], kind: LimitKind, timing: &Timing) -> Vec<LinkPool> {
    let mut pools: Vec<LinkPool> = Vec::new();
    for account in accounts {
        let key = match account.link(kind) {
            Some(key) => key,
            None => continue,
        };
        let reported = Bound::total(&magnitudes(&limits(account.as_ref(), kind, timing)));

        match pools.iter_mut().find(|pool| pool.key == key) {
            Some(pool) => {
                if pool.limit != reported {
                    warn!(
                        link = %key,
                        account = %account.id(),
                        reported = %reported,
                        current = %pool.limit,
                        "Link group members disagree on shared limit, using the smallest"
                    );
                    pool.limit = pool.limit.min(reported);
                }
                pool.members.push(account.id().clone());
            }
            None => pools.push(LinkPool {
                key,
                kind,
                members: vec![account.id().clone()],
                limit: reported,
            }),
        }
    }
    pools
}

fn magnitudes(schedule: &LimitSchedule) -> LimitSchedule {
    schedule.iter().map(|(t, b)| (*t, b.abs())).collect()
}

/// Capacity of one account for the call's polarity
#[derive(Debug, Clone)]
pub struct AccountCapacity {
    /// Handle
    pub account: AccountHandle,
    /// Mandatory amount per instant (magnitudes)
    pub min: LimitSchedule,
    /// Maximum amount per instant (magnitudes)
    pub max: LimitSchedule,
    /// Sum of `min`
    pub min_total: Decimal,
    /// Sum of `max`
    pub max_total: Bound,
    /// Pool shared for the minimum kind
    pub min_pool: Option<PoolId>,
    /// Pool shared for the maximum kind
    pub max_pool: Option<PoolId>,
}

impl AccountCapacity {
    /// Maximum at one instant
    pub fn max_at(&self, time: Time) -> Bound {
        self.max.get(&time).copied().unwrap_or(Bound::ZERO)
    }
}

/// Everything the passes need to know about account capacity, read once
#[derive(Debug, Clone)]
pub struct CapacitySnapshot {
    /// Direction of the call
    pub polarity: Polarity,
    /// Timing the limits were read for
    pub timing: Timing,
    accounts: BTreeMap<AccountId, AccountCapacity>,
    pools: Vec<LinkPool>,
}

impl CapacitySnapshot {
    /// Read and validate the capacity of every account in `tree`
    pub fn resolve(tree: &PriorityTree, timing: &Timing, polarity: Polarity) -> Result<Self> {
        let min_kind = LimitKind::min_for(polarity);
        let max_kind = LimitKind::max_for(polarity);

        let mut pools = partition(tree.accounts(), min_kind, timing);
        let min_pool_count = pools.len();
        pools.extend(partition(tree.accounts(), max_kind, timing));

        let mut accounts = BTreeMap::new();
        for account in tree.accounts() {
            let min = magnitudes(&limits(account.as_ref(), min_kind, timing));
            let max = magnitudes(&limits(account.as_ref(), max_kind, timing));

            for (time, bound) in &min {
                let floor = match bound {
                    Bound::Finite(value) => *value,
                    Bound::Unbounded => continue,
                };
                let ceiling = max.get(time).copied().unwrap_or(Bound::ZERO);
                if !ceiling.admits(floor) {
                    return Err(Error::ContradictoryLimits {
                        account: account.id().clone(),
                        kind: min_kind,
                        time: *time,
                        min: floor,
                        max: ceiling.finite().unwrap_or(Decimal::ZERO),
                    });
                }
            }

            let min_total: Decimal = min
                .values()
                .map(|bound| match bound {
                    Bound::Finite(value) => *value,
                    Bound::Unbounded => {
                        warn!(account = %account.id(), "Unbounded minimum treated as zero");
                        Decimal::ZERO
                    }
                })
                .sum();
            let max_total = Bound::total(&max);

            let id = account.id();
            let min_pool = pools[..min_pool_count]
                .iter()
                .position(|pool| pool.members.contains(id));
            let max_pool = pools[min_pool_count..]
                .iter()
                .position(|pool| pool.members.contains(id))
                .map(|index| index + min_pool_count);

            accounts.insert(
                id.clone(),
                AccountCapacity {
                    account: account.clone(),
                    min,
                    max,
                    min_total,
                    max_total,
                    min_pool,
                    max_pool,
                },
            );
        }

        debug!(
            polarity = %polarity,
            accounts = accounts.len(),
            pools = pools.len(),
            "Capacity snapshot resolved"
        );

        Ok(Self {
            polarity,
            timing: timing.clone(),
            accounts,
            pools,
        })
    }

    /// Capacity of one account
    pub fn account(&self, id: &AccountId) -> Option<&AccountCapacity> {
        self.accounts.get(id)
    }

    /// All accounts, by id
    pub fn accounts(&self) -> impl Iterator<Item = &AccountCapacity> {
        self.accounts.values()
    }

    /// Pool by id
    pub fn pool(&self, id: PoolId) -> &LinkPool {
        &self.pools[id]
    }

    /// All pools; minimum-kind pools come first
    pub fn pools(&self) -> &[LinkPool] {
        &self.pools
    }
}
