// Rebalance Module - Restores weighted proportions after a solve

use super::graph_builder::GraphBuilder;
use super::{flow_on, inflow, solve, FlowMap, FlowNetwork, FlowNode};
use crate::resolver::PoolId;
use crate::tree::PositionId;
use std::collections::BTreeMap;
use tracing::debug;

/// How a weighted child fared in the last solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Took less than its direct share: a bottleneck
    Underflow,
    /// Took excess through the overflow node
    Overflow,
    /// Took exactly its direct share
    Saturated,
}

/// Classify one child of a weighted position
pub fn classify(flows: &FlowMap, parent: PositionId, child: PositionId, share: i64) -> ChildState {
    let node = FlowNode::Position(child);
    if flow_on(flows, &FlowNode::Overflow(parent), &node) > 0 {
        ChildState::Overflow
    } else if flow_on(flows, &FlowNode::Position(parent), &node) < share {
        ChildState::Underflow
    } else {
        ChildState::Saturated
    }
}

/// Re-splits weighted positions by the flow they actually receive
#[derive(Debug)]
pub struct Rebalancer<'a, 'b> {
    builder: &'b GraphBuilder<'a>,
    max_rounds: usize,
}

impl<'a, 'b> Rebalancer<'a, 'b> {
    /// Create a rebalancer allowing `max_rounds` solves per position
    pub fn new(builder: &'b GraphBuilder<'a>, max_rounds: usize) -> Self {
        Self {
            builder,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Visit weighted positions top-down, breadth-first, and return the
    /// flows of the final network
    pub fn run(&self, network: &mut FlowNetwork, mut flows: FlowMap, limit: i64) -> (FlowMap, usize) {
        let mut solves = 0;
        for position in self.builder.tree().weighted_breadth_first() {
            let (rebalanced, count) = self.rebalance(network, position, flows, limit);
            flows = rebalanced;
            solves += count;
        }
        (flows, solves)
    }

    /// Split the flow arriving at `position` by weight, pinning children
    /// that can't take their share at what they took and re-splitting
    /// the rest among the others. Solves only when a capacity changed.
    fn rebalance(
        &self,
        network: &mut FlowNetwork,
        position: PositionId,
        mut flows: FlowMap,
        limit: i64,
    ) -> (FlowMap, usize) {
        let from = FlowNode::Position(position);
        let mut pinned: BTreeMap<PositionId, i64> = BTreeMap::new();
        let mut solves = 0;

        // Pins added since the network was last updated
        let mut pending = false;

        for round in 0..self.max_rounds {
            let (shares, changed) = self.split(network, position, &flows, &pinned);
            if changed {
                flows = solve(network, limit);
                solves += 1;
            }
            pending = false;
            let arrived = inflow(&flows, &from);

            let bottlenecks: Vec<PositionId> = shares
                .iter()
                .filter(|(child, share)| classify(&flows, position, *child, *share) == ChildState::Underflow)
                .map(|(child, _)| *child)
                .collect();

            debug!(
                position,
                round,
                arrived,
                pinned = pinned.len(),
                bottlenecks = bottlenecks.len(),
                resolved = changed,
                "Weighted position rebalanced"
            );

            if bottlenecks.is_empty() {
                break;
            }
            for child in bottlenecks {
                if pinned.contains_key(&child) {
                    continue;
                }
                match self.saturated_pool(&flows, child) {
                    // Siblings drawing on the same full pool split what
                    // it let through by weight
                    Some(pool) => {
                        let siblings: Vec<PositionId> = shares
                            .iter()
                            .map(|(sibling, _)| *sibling)
                            .filter(|sibling| {
                                !pinned.contains_key(sibling)
                                    && self.builder.max_pool_below(*sibling) == Some(pool)
                            })
                            .collect();
                        let through: i64 = siblings
                            .iter()
                            .map(|sibling| inflow(&flows, &FlowNode::Position(*sibling)))
                            .sum();
                        pinned.extend(
                            self.builder
                                .split_children(position, through, |c| siblings.contains(&c)),
                        );
                    }
                    None => {
                        pinned.insert(child, flow_on(&flows, &from, &FlowNode::Position(child)));
                    }
                }
            }
            pending = true;
            if pinned.len() == self.builder.tree().children(position).len() {
                // Every child is pinned; nothing left to re-split
                break;
            }
        }

        if pending {
            let (_, changed) = self.split(network, position, &flows, &pinned);
            if changed {
                flows = solve(network, limit);
                solves += 1;
            }
        }
        (flows, solves)
    }

    /// Set direct capacities: pinned children keep their pin, the rest
    /// split what arrived beyond the pins. Returns the free children's
    /// shares and whether any capacity changed.
    fn split(
        &self,
        network: &mut FlowNetwork,
        position: PositionId,
        flows: &FlowMap,
        pinned: &BTreeMap<PositionId, i64>,
    ) -> (Vec<(PositionId, i64)>, bool) {
        let from = FlowNode::Position(position);
        let arrived = inflow(flows, &from);
        let pinned_total: i64 = pinned.values().sum();
        let shares = self
            .builder
            .split_children(position, (arrived - pinned_total).max(0), |child| !pinned.contains_key(&child));

        let mut changed = false;
        for (child, share) in shares.iter().copied().chain(pinned.iter().map(|(c, f)| (*c, *f))) {
            changed |= network.set_capacity(&from, &FlowNode::Position(child), Some(share));
        }
        (shares, changed)
    }

    /// Max pool below `child` that the last solve filled
    fn saturated_pool(&self, flows: &FlowMap, child: PositionId) -> Option<PoolId> {
        let pool = self.builder.max_pool_below(child)?;
        let capacity = self.builder.pool_capacity(pool)?;
        (flow_on(flows, &FlowNode::Pool(pool), &FlowNode::Sink) >= capacity).then_some(pool)
    }
}
