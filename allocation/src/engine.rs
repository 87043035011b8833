//! Allocation engine
//!
//! Entry point tying the passes together: resolve capacity, grant
//! minimums, route the rest, translate flows into dated amounts.

use crate::config::Config;
use crate::maximum::assign_maximums;
use crate::minimum::{assign_minimums, MinimumGrants};
use crate::network::Scale;
use crate::resolver::CapacitySnapshot;
use crate::timing::{Frequency, Timing, When};
use crate::translator::translate;
use crate::tree::{PriorityNode, PriorityTree};
use crate::types::{schedule_total, Allocation, Polarity, Schedule};
use crate::Result;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Allocates amounts across a priority tree of accounts
#[derive(Debug, Clone, Default)]
pub struct AllocationEngine {
    config: Config,
}

impl AllocationEngine {
    /// Create an engine; the configuration is validated
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocate the whole of `available` (time -> signed amount)
    pub fn allocate(&self, available: &Schedule, tree: &PriorityNode) -> Result<Allocation> {
        self.allocate_total(available, schedule_total(available), tree)
    }

    /// Allocate `total` with the timing implied by `available`
    pub fn allocate_total(
        &self,
        available: &Schedule,
        total: Decimal,
        tree: &PriorityNode,
    ) -> Result<Allocation> {
        // Malformed trees are rejected even when there is nothing to move
        let tree = PriorityTree::compile(tree)?;

        let polarity = match Polarity::of(total) {
            Some(polarity) if total.abs() >= self.config.tolerance => polarity,
            _ => {
                debug!(%total, "Nothing to allocate");
                return Ok(Allocation::empty(Polarity::Inflow, total));
            }
        };

        let mut timing = Timing::from_schedule(available);
        if timing.is_empty() {
            timing = Timing::new(When::default(), Frequency::default());
        }

        let snapshot = CapacitySnapshot::resolve(&tree, &timing, polarity)?;
        let scale = Scale::new(self.config.scale);
        let requested = scale.checked_units(total.abs())?;

        let grants = if self.config.assign_minimums {
            assign_minimums(&tree, &snapshot, scale, requested)
        } else {
            MinimumGrants::none(tree.len(), requested)
        };
        let maximum = assign_maximums(
            &tree,
            &snapshot,
            &grants,
            scale,
            self.config.max_rebalance_rounds,
        );
        // Floored away when scaling; placed on one account by the translator
        let residue = total.abs() - scale.to_money(requested);
        let transactions = translate(&tree, &snapshot, &grants, &maximum, scale, residue);

        let minimum_total = scale.to_money(grants.total);
        let allocated: Decimal = transactions
            .values()
            .flat_map(|schedule| schedule.values())
            .map(|amount| amount.abs())
            .sum();
        let allocation = Allocation {
            polarity,
            requested: total,
            minimum_total,
            maximum_total: allocated - minimum_total,
            transactions,
        };

        if allocation.shortfall() > self.config.tolerance {
            warn!(
                polarity = %polarity,
                requested = %total,
                allocated = %allocation.allocated(),
                shortfall = %allocation.shortfall(),
                "Capacity below requested amount"
            );
        }
        info!(
            polarity = %polarity,
            requested = %total,
            minimum = %allocation.minimum_total,
            maximum = %allocation.maximum_total,
            accounts = allocation.transactions.len(),
            "Allocation complete"
        );
        Ok(allocation)
    }

    /// Apply an allocation's schedules to the accounts in `tree`, at
    /// most once per account. Returns how many accounts were applied.
    pub fn apply(&self, allocation: &Allocation, tree: &PriorityNode) -> Result<usize> {
        let tree = PriorityTree::compile(tree)?;
        let mut applied = 0;
        for account in tree.accounts() {
            if let Some(schedule) = allocation.transactions.get(account.id()) {
                account.apply(schedule);
                applied += 1;
            }
        }
        debug!(applied, "Allocation applied");
        Ok(applied)
    }

    /// Allocate then apply
    pub fn allocate_and_apply(&self, available: &Schedule, tree: &PriorityNode) -> Result<Allocation> {
        let allocation = self.allocate(available, tree)?;
        self.apply(&allocation, tree)?;
        Ok(allocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, BasicAccount};
    use crate::types::{AccountId, LimitKind};
    use crate::Error;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_availability_allocates_nothing() {
        let engine = AllocationEngine::default();
        let tree = PriorityNode::account(BasicAccount::new("a").into_handle());
        let allocation = engine.allocate(&Schedule::from([(dec!(0.5), dec!(0))]), &tree).unwrap();
        assert!(allocation.transactions.is_empty());
        assert_eq!(allocation.allocated(), Decimal::ZERO);
    }

    #[test]
    fn test_malformed_tree_rejected_before_allocation() {
        let engine = AllocationEngine::default();
        let result = engine.allocate(&Schedule::from([(dec!(0.5), dec!(10))]), &PriorityNode::ordered(vec![]));
        assert!(matches!(result, Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_outflow_amounts_are_negative() {
        let engine = AllocationEngine::default();
        let account = BasicAccount::new("rrif").with_limit(LimitKind::MaxOutflow, dec!(60));
        let tree = PriorityNode::account(account.into_handle());

        let allocation = engine.allocate(&Schedule::from([(dec!(1), dec!(-100))]), &tree).unwrap();
        assert_eq!(allocation.polarity, Polarity::Outflow);
        assert_eq!(allocation.allocated(), dec!(-60));
        assert_eq!(allocation.amount_at(&AccountId::new("rrif"), dec!(1)), dec!(-60));
        assert_eq!(allocation.shortfall(), dec!(40));
    }

    #[test]
    fn test_total_override_keeps_timing() {
        let engine = AllocationEngine::default();
        let tree = PriorityNode::account(BasicAccount::new("a").into_handle());
        let available = Schedule::from([(dec!(0), dec!(10)), (dec!(1), dec!(30))]);

        let allocation = engine.allocate_total(&available, dec!(80), &tree).unwrap();
        assert_eq!(allocation.amount_at(&AccountId::new("a"), dec!(0)), dec!(20));
        assert_eq!(allocation.amount_at(&AccountId::new("a"), dec!(1)), dec!(60));
    }

    #[test]
    fn test_allocate_and_apply_records_once() {
        let engine = AllocationEngine::default();
        let account = std::sync::Arc::new(BasicAccount::new("a").with_limit(LimitKind::MaxInflow, dec!(50)));
        let handle: crate::account::AccountHandle = account.clone();
        let tree = PriorityNode::ordered(vec![handle.clone().into(), handle.into()]);

        let allocation = engine
            .allocate_and_apply(&Schedule::from([(dec!(0.5), dec!(80))]), &tree)
            .unwrap();
        assert_eq!(allocation.account_total(account.id()), dec!(50));
        assert_eq!(account.history().len(), 1);
        assert_eq!(account.limit(LimitKind::MaxInflow), crate::types::Bound::ZERO);
    }
}
