//! Minimum-flow pass
//!
//! Grants every account's mandatory minimum before anything
//! discretionary, in first-appearance order of the accounts.

use crate::network::Scale;
use crate::resolver::CapacitySnapshot;
use crate::tree::{PositionId, PriorityTree};
use crate::types::AccountId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of the minimum pass, in solver units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinimumGrants {
    grants: BTreeMap<AccountId, i64>,
    prior: Vec<i64>,
    /// Total granted
    pub total: i64,
    /// Requested amount still unallocated
    pub residual: i64,
    /// Minimums that could not be covered
    pub shortfall: i64,
}

impl MinimumGrants {
    /// Nothing granted
    pub fn none(positions: usize, requested: i64) -> Self {
        Self {
            grants: BTreeMap::new(),
            prior: vec![0; positions],
            total: 0,
            residual: requested,
            shortfall: 0,
        }
    }

    /// Amount granted to an account
    pub fn grant(&self, account: &AccountId) -> i64 {
        self.grants.get(account).copied().unwrap_or(0)
    }

    /// Amount granted beneath a position
    pub fn prior(&self, position: PositionId) -> i64 {
        self.prior.get(position).copied().unwrap_or(0)
    }

    /// Granted amounts by account
    pub fn grants(&self) -> &BTreeMap<AccountId, i64> {
        &self.grants
    }
}

/// Grant minimums out of `requested` units.
///
/// Each grant is capped by the residual, the account's own maximum, any
/// shared minimum or maximum pool it belongs to, and the limits of
/// limited ancestors of its first leaf. When minimums exceed the
/// request, earlier accounts are covered first.
pub fn assign_minimums(
    tree: &PriorityTree,
    snapshot: &CapacitySnapshot,
    scale: Scale,
    requested: i64,
) -> MinimumGrants {
    let mut result = MinimumGrants::none(tree.len(), requested);
    let mut pool_used = vec![0i64; snapshot.pools().len()];
    let mut demanded = 0i64;

    for account in tree.accounts() {
        let id = account.id();
        let capacity = match snapshot.account(id) {
            Some(capacity) => capacity,
            None => continue,
        };
        let minimum = scale.to_units(capacity.min_total);
        if minimum <= 0 {
            continue;
        }
        demanded = demanded.saturating_add(minimum);

        let position = match tree.leaf_positions(id).first() {
            Some(position) => *position,
            None => continue,
        };

        let mut caps = vec![Some(minimum), Some(result.residual), scale.capacity(capacity.max_total)];
        for pool in [capacity.min_pool, capacity.max_pool].into_iter().flatten() {
            caps.push(
                scale
                    .capacity(snapshot.pool(pool).limit)
                    .map(|limit| limit - pool_used[pool]),
            );
        }
        for limited in tree.limited_ancestors(position) {
            if let Some(limits) = tree.limits(limited) {
                let prior = result.prior(limited);
                for cap in [limits.min_for(snapshot.polarity), limits.max_for(snapshot.polarity)] {
                    caps.push(cap.map(|amount| scale.to_units(amount) - prior));
                }
            }
        }

        let grant = caps.into_iter().flatten().min().unwrap_or(0).max(0);
        if grant == 0 {
            continue;
        }

        *result.grants.entry(id.clone()).or_insert(0) += grant;
        for pool in [capacity.min_pool, capacity.max_pool].into_iter().flatten() {
            pool_used[pool] += grant;
        }
        result.prior[position] += grant;
        for ancestor in tree.ancestors(position) {
            result.prior[ancestor] += grant;
        }
        result.total += grant;
        result.residual -= grant;

        debug!(account = %id, minimum, grant, residual = result.residual, "Minimum granted");
    }

    result.shortfall = demanded - result.total;
    if result.shortfall > 0 {
        warn!(
            demanded,
            granted = result.total,
            shortfall = result.shortfall,
            "Availability does not cover all minimums"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::BasicAccount;
    use crate::link::{LinkKey, LinkRegistry};
    use crate::timing::{Frequency, Timing, When};
    use crate::tree::{NodeLimits, PriorityNode};
    use crate::types::{Bound, LimitKind, Polarity};
    use rust_decimal_macros::dec;

    fn run(root: PriorityNode, requested: i64) -> (PriorityTree, MinimumGrants) {
        let tree = PriorityTree::compile(&root).unwrap();
        let timing = Timing::new(When::default(), Frequency::default());
        let snapshot = CapacitySnapshot::resolve(&tree, &timing, Polarity::Inflow).unwrap();
        let grants = assign_minimums(&tree, &snapshot, Scale::new(2), requested);
        (tree, grants)
    }

    #[test]
    fn test_minimum_granted_regardless_of_position() {
        let debt = BasicAccount::new("debt")
            .with_limit(LimitKind::MinInflow, dec!(10))
            .into_handle();
        let savings = BasicAccount::new("savings").into_handle();
        let (_, grants) = run(PriorityNode::ordered(vec![savings.into(), debt.clone().into()]), 1000);

        assert_eq!(grants.grant(debt.id()), 1000);
        assert_eq!(grants.residual, 0);
        assert_eq!(grants.prior(0), 1000);
        assert_eq!(grants.prior(2), 1000);
        assert_eq!(grants.prior(1), 0);
    }

    #[test]
    fn test_shortfall_covers_earlier_accounts_first() {
        let a = BasicAccount::new("a").with_limit(LimitKind::MinInflow, dec!(30)).into_handle();
        let b = BasicAccount::new("b").with_limit(LimitKind::MinInflow, dec!(30)).into_handle();
        let (_, grants) = run(PriorityNode::ordered(vec![a.clone().into(), b.clone().into()]), 4000);

        assert_eq!(grants.grant(a.id()), 3000);
        assert_eq!(grants.grant(b.id()), 1000);
        assert_eq!(grants.shortfall, 2000);
    }

    #[test]
    fn test_shared_pool_caps_minimums() {
        let registry = LinkRegistry::new();
        let record = registry.register(LinkKey::new("alice", "room"), &AccountId::new("a"));
        record.set_limit(Bound::Finite(dec!(50)));

        let a = BasicAccount::new("a")
            .with_limit(LimitKind::MinInflow, dec!(40))
            .with_link(LimitKind::MaxInflow, record.clone())
            .into_handle();
        let b = BasicAccount::new("b")
            .with_limit(LimitKind::MinInflow, dec!(40))
            .with_link(LimitKind::MaxInflow, record)
            .into_handle();
        let (_, grants) = run(PriorityNode::ordered(vec![a.clone().into(), b.clone().into()]), 100_000);

        assert_eq!(grants.grant(a.id()), 4000);
        assert_eq!(grants.grant(b.id()), 1000);
    }

    #[test]
    fn test_limited_ancestor_caps_minimum() {
        let a = BasicAccount::new("a").with_limit(LimitKind::MinInflow, dec!(40)).into_handle();
        let (_, grants) = run(
            PriorityNode::limited(a.clone().into(), NodeLimits::new().with(LimitKind::MaxInflow, dec!(25))),
            100_000,
        );
        assert_eq!(grants.grant(a.id()), 2500);
    }
}
