// Graph Builder Module - Turns a priority tree into a flow network

use super::{FlowNetwork, FlowNode, Scale};
use crate::minimum::MinimumGrants;
use crate::resolver::{CapacitySnapshot, PoolId};
use crate::tree::{Position, PositionId, PriorityTree};
use crate::types::AccountId;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Builds the maximum-pass network for one tree and snapshot
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    tree: &'a PriorityTree,
    snapshot: &'a CapacitySnapshot,
    grants: &'a MinimumGrants,
    scale: Scale,
    /// Largest path cost from each position down to the sink
    path_costs: Vec<i64>,
}

impl<'a> GraphBuilder<'a> {
    /// Prepare a builder; path costs are computed bottom-up once
    pub fn new(
        tree: &'a PriorityTree,
        snapshot: &'a CapacitySnapshot,
        grants: &'a MinimumGrants,
        scale: Scale,
    ) -> Self {
        let mut builder = Self {
            tree,
            snapshot,
            grants,
            scale,
            path_costs: vec![0; tree.len()],
        };
        // Pre-order numbering puts every child after its parent
        for position in (0..tree.len()).rev() {
            builder.path_costs[position] = builder.compute_path_cost(position);
        }
        builder
    }

    fn compute_path_cost(&self, position: PositionId) -> i64 {
        match self.tree.position(position) {
            Position::Leaf(_) => 0,
            Position::Ordered(children) => self
                .ordered_costs(children)
                .iter()
                .zip(children)
                .map(|(cost, child)| cost + self.path_costs[*child])
                .max()
                .unwrap_or(0),
            Position::Weighted(_) => self.overflow_cost(position) + self.max_child_cost(position),
            Position::Limited(child, _) => self.path_costs[*child],
        }
    }

    fn max_child_cost(&self, position: PositionId) -> i64 {
        self.tree
            .children(position)
            .iter()
            .map(|child| self.path_costs[*child])
            .max()
            .unwrap_or(0)
    }

    /// Entry cost of a weighted position's overflow node: above every
    /// direct path through its children
    pub fn overflow_cost(&self, position: PositionId) -> i64 {
        1 + self.max_child_cost(position)
    }

    /// Edge costs for ordered children: each child's cheapest path costs
    /// more than every path through the children before it
    pub fn ordered_costs(&self, children: &[PositionId]) -> Vec<i64> {
        let mut costs = Vec::with_capacity(children.len());
        let mut next = 0;
        for child in children {
            costs.push(next);
            next += self.path_costs[*child] + 1;
        }
        costs
    }

    /// Largest path cost from `position` to the sink
    pub fn path_cost(&self, position: PositionId) -> i64 {
        self.path_costs[position]
    }

    /// Build the full network for `requested` units
    pub fn build(&self, requested: i64) -> FlowNetwork {
        let mut network = FlowNetwork::new();
        let root = self.tree.root();
        network.set_edge(FlowNode::Source, FlowNode::Position(root), Some(requested.max(0)), 0);
        self.add_successors(&mut network, root, requested.max(0));
        self.add_accounts(&mut network);
        network
    }

    /// Add (or refresh) every edge below `position`. Weighted shares are
    /// split from `budget`. Calling this again on an existing network
    /// only updates capacities.
    pub fn add_successors(&self, network: &mut FlowNetwork, position: PositionId, budget: i64) {
        let from = FlowNode::Position(position);
        match self.tree.position(position) {
            Position::Leaf(target) => {
                for account in target.accounts() {
                    network.set_edge(from.clone(), FlowNode::Account(account.id().clone()), None, 0);
                }
            }
            Position::Ordered(children) => {
                for (child, cost) in children.iter().zip(self.ordered_costs(children)) {
                    network.set_edge(from.clone(), FlowNode::Position(*child), None, cost);
                    self.add_successors(network, *child, budget);
                }
            }
            Position::Weighted(_) => {
                let overflow = FlowNode::Overflow(position);
                network.set_edge(from.clone(), overflow.clone(), None, self.overflow_cost(position));
                for (child, share) in self.shares(position, budget, &[]) {
                    network.set_edge(from.clone(), FlowNode::Position(child), Some(share), 0);
                    network.set_edge(overflow.clone(), FlowNode::Position(child), None, 0);
                    self.add_successors(network, child, share);
                }
            }
            Position::Limited(child, limits) => {
                let capacity = limits
                    .max_for(self.snapshot.polarity)
                    .map(|limit| (self.scale.to_units(limit) - self.grants.prior(position)).max(0));
                let outbound = FlowNode::Outbound(position);
                network.set_edge(from, outbound.clone(), capacity, 0);
                network.set_edge(outbound, FlowNode::Position(*child), None, 0);
                let budget = capacity.map_or(budget, |capacity| capacity.min(budget));
                self.add_successors(network, *child, budget);
            }
        }
    }

    /// Account, pool and sink edges. Capacities are net of minimum grants.
    fn add_accounts(&self, network: &mut FlowNetwork) {
        for account in self.tree.accounts() {
            let id = account.id();
            let capacity = match self.snapshot.account(id) {
                Some(capacity) => capacity,
                None => continue,
            };
            let remaining = self.account_capacity(id);
            let node = FlowNode::Account(id.clone());

            match capacity.max_pool {
                Some(pool) => {
                    network.set_edge(node, FlowNode::Pool(pool), remaining, 0);
                    network.set_edge(FlowNode::Pool(pool), FlowNode::Sink, self.pool_capacity(pool), 0);
                }
                None => {
                    network.set_edge(node, FlowNode::Sink, remaining, 0);
                }
            }
        }
    }

    /// Remaining maximum of an account after its minimum grant
    pub fn account_capacity(&self, id: &AccountId) -> Option<i64> {
        self.snapshot.account(id).and_then(|capacity| {
            self.scale
                .capacity(capacity.max_total)
                .map(|max| (max - self.grants.grant(id)).max(0))
        })
    }

    /// Remaining shared limit of a pool after minimum grants
    pub fn pool_capacity(&self, pool: PoolId) -> Option<i64> {
        let pool = self.snapshot.pool(pool);
        let granted: i64 = pool.members.iter().map(|member| self.grants.grant(member)).sum();
        self.scale
            .capacity(pool.limit)
            .map(|limit| (limit - granted).max(0))
    }

    /// Split `total` between the children of a weighted position that
    /// aren't in `excluded`
    pub fn shares(
        &self,
        position: PositionId,
        total: i64,
        excluded: &[PositionId],
    ) -> Vec<(PositionId, i64)> {
        self.split_children(position, total, |child| !excluded.contains(&child))
    }

    /// Split `total` by weight between the children of a weighted
    /// position accepted by `include`
    pub fn split_children(
        &self,
        position: PositionId,
        total: i64,
        include: impl Fn(PositionId) -> bool,
    ) -> Vec<(PositionId, i64)> {
        let members: Vec<(PositionId, Decimal, i64)> = self
            .tree
            .weights(position)
            .unwrap_or(&[])
            .iter()
            .filter(|(child, _)| include(*child))
            .map(|(child, weight)| (*child, *weight, self.grants.prior(*child)))
            .collect();
        split_by_weight(total, &members)
    }

    /// The max pool every account below `position` draws on, if they
    /// all share one
    pub fn max_pool_below(&self, position: PositionId) -> Option<PoolId> {
        let mut pools = self
            .tree
            .subtree(position)
            .into_iter()
            .filter_map(|p| match self.tree.position(p) {
                Position::Leaf(target) => Some(target.accounts()),
                _ => None,
            })
            .flatten()
            .map(|account| self.snapshot.account(account.id()).and_then(|c| c.max_pool));
        let first = pools.next().flatten()?;
        pools.all(|pool| pool == Some(first)).then_some(first)
    }

    /// The tree this builder reads
    pub fn tree(&self) -> &'a PriorityTree {
        self.tree
    }
}

/// Split `total` units between `(id, weight, prior)` members so that
/// each member's prior plus share is proportional to its weight.
///
/// Members whose prior already exceeds their proportion get nothing and
/// the rest is re-split without them. Shares are integral and sum to
/// `total` exactly; leftover units go to the largest fractional parts,
/// earlier members first on ties.
pub fn split_by_weight(total: i64, members: &[(PositionId, Decimal, i64)]) -> Vec<(PositionId, i64)> {
    let count = members.len();
    let mut active = vec![true; count];
    let mut exact = vec![Decimal::ZERO; count];

    loop {
        let weight_sum: Decimal = members
            .iter()
            .zip(&active)
            .filter(|(_, active)| **active)
            .map(|(member, _)| member.1)
            .sum();
        if weight_sum.is_zero() {
            break;
        }
        let prior_sum: i64 = members
            .iter()
            .zip(&active)
            .filter(|(_, active)| **active)
            .map(|(member, _)| member.2)
            .fold(0i64, i64::saturating_add);
        let pot = Decimal::from(total) + Decimal::from(prior_sum);

        for (index, (_, weight, prior)) in members.iter().enumerate() {
            exact[index] = if active[index] {
                pot * *weight / weight_sum - Decimal::from(*prior)
            } else {
                Decimal::ZERO
            };
        }

        let mut removed = false;
        for index in 0..count {
            if active[index] && exact[index] < Decimal::ZERO {
                active[index] = false;
                exact[index] = Decimal::ZERO;
                removed = true;
            }
        }
        if !removed {
            break;
        }
    }

    let mut shares: Vec<i64> = exact
        .iter()
        .map(|value| value.floor().to_i64().unwrap_or(0))
        .collect();
    let mut leftover = total - shares.iter().sum::<i64>();

    let mut order: Vec<usize> = (0..count).filter(|index| active[*index]).collect();
    order.sort_by(|a, b| {
        let fa = exact[*a] - exact[*a].floor();
        let fb = exact[*b] - exact[*b].floor();
        fb.cmp(&fa).then(a.cmp(b))
    });

    while leftover > 0 && !order.is_empty() {
        for index in &order {
            if leftover == 0 {
                break;
            }
            shares[*index] += 1;
            leftover -= 1;
        }
    }
    while leftover < 0 {
        let before = leftover;
        for index in order.iter().rev() {
            if leftover == 0 {
                break;
            }
            if shares[*index] > 0 {
                shares[*index] -= 1;
                leftover += 1;
            }
        }
        if leftover == before {
            break;
        }
    }

    members
        .iter()
        .zip(shares)
        .map(|((id, _, _), share)| (*id, share))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::BasicAccount;
    use crate::minimum::MinimumGrants;
    use crate::timing::{Frequency, Timing, When};
    use crate::tree::{NodeLimits, PriorityNode};
    use crate::types::{LimitKind, Polarity};
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_equal_weights() {
        let shares = split_by_weight(10_000, &[(1, dec!(1), 0), (2, dec!(1), 0)]);
        assert_eq!(shares, vec![(1, 5000), (2, 5000)]);
    }

    #[test]
    fn test_split_largest_remainder() {
        let shares = split_by_weight(100, &[(1, dec!(1), 0), (2, dec!(1), 0), (3, dec!(1), 0)]);
        assert_eq!(shares, vec![(1, 34), (2, 33), (3, 33)]);
    }

    #[test]
    fn test_split_accounts_for_prior() {
        let shares = split_by_weight(100, &[(1, dec!(1), 60), (2, dec!(1), 0)]);
        assert_eq!(shares, vec![(1, 20), (2, 80)]);
    }

    #[test]
    fn test_split_drops_members_over_proportion() {
        let shares = split_by_weight(10, &[(1, dec!(1), 100), (2, dec!(1), 0)]);
        assert_eq!(shares, vec![(1, 0), (2, 10)]);
    }

    fn leaf(id: &str, max: rust_decimal::Decimal) -> PriorityNode {
        PriorityNode::account(BasicAccount::new(id).with_limit(LimitKind::MaxInflow, max).into_handle())
    }

    #[test]
    fn test_ordered_costs_exceed_earlier_paths() {
        let tree = PriorityTree::compile(&PriorityNode::ordered(vec![
            PriorityNode::weighted(vec![(leaf("a", dec!(10)), dec!(1)), (leaf("b", dec!(10)), dec!(1))]),
            leaf("c", dec!(10)),
        ]))
        .unwrap();
        let timing = Timing::new(When::default(), Frequency::default());
        let snapshot = CapacitySnapshot::resolve(&tree, &timing, Polarity::Inflow).unwrap();
        let grants = MinimumGrants::none(tree.len(), 3000);
        let builder = GraphBuilder::new(&tree, &snapshot, &grants, Scale::new(2));

        // weighted: overflow entry 1, path cost 1 + 0
        assert_eq!(builder.path_cost(1), 1);
        assert_eq!(builder.ordered_costs(&[1, 4]), vec![0, 2]);

        let network = builder.build(3000);
        let direct = network.edge(&FlowNode::Position(1), &FlowNode::Position(2)).unwrap();
        assert_eq!(direct.capacity, Some(1500));
        let sink = network.edge(&FlowNode::Account(AccountId::new("c")), &FlowNode::Sink);
        assert_eq!(sink.unwrap().capacity, Some(1000));
    }

    #[test]
    fn test_limited_position_gets_outbound_node() {
        let tree = PriorityTree::compile(&PriorityNode::limited(
            leaf("a", dec!(100)),
            NodeLimits::new().with(LimitKind::MaxInflow, dec!(40)),
        ))
        .unwrap();
        let timing = Timing::new(When::default(), Frequency::default());
        let snapshot = CapacitySnapshot::resolve(&tree, &timing, Polarity::Inflow).unwrap();
        let grants = MinimumGrants::none(tree.len(), 10_000);
        let network = GraphBuilder::new(&tree, &snapshot, &grants, Scale::new(2)).build(10_000);

        let outbound = network.edge(&FlowNode::Position(0), &FlowNode::Outbound(0)).unwrap();
        assert_eq!(outbound.capacity, Some(4000));
        assert!(network.edge(&FlowNode::Outbound(0), &FlowNode::Position(1)).is_some());
    }
}
