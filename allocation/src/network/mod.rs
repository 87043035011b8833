// Flow Network Module
// Directed min-cost flow network built from a priority tree

/// Tree-to-network construction
pub mod graph_builder;
/// Weighted re-splitting between solves
pub mod rebalance;
/// Min-cost flow solver
pub mod solver;

use crate::resolver::PoolId;
use crate::tree::PositionId;
use crate::types::{AccountId, Bound};
use crate::{Error, Result};
use petgraph::graph::{EdgeIndex, NodeIndex};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

pub use graph_builder::GraphBuilder;
pub use rebalance::Rebalancer;
pub use solver::solve;

/// Flow network graph
pub type FlowGraph = petgraph::Graph<FlowNode, FlowEdge, petgraph::Directed>;

/// Node in the flow network
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowNode {
    /// Where the requested amount enters
    Source,
    /// Where allocated flow leaves
    Sink,
    /// A tree position
    Position(PositionId),
    /// Capped exit of a limited position
    Outbound(PositionId),
    /// Excess route of a weighted position
    Overflow(PositionId),
    /// An account (one node however many positions reference it)
    Account(AccountId),
    /// A shared-limit pool
    Pool(PoolId),
}

/// Edge capacity and priority cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    /// Capacity in minor units; `None` is unbounded
    pub capacity: Option<i64>,
    /// Cost per unit of flow
    pub cost: i64,
}

/// Flow per edge, keyed by (from, to)
pub type FlowMap = BTreeMap<(FlowNode, FlowNode), i64>;

/// Flow on one edge (zero if absent)
pub fn flow_on(flows: &FlowMap, from: &FlowNode, to: &FlowNode) -> i64 {
    flows
        .get(&(from.clone(), to.clone()))
        .copied()
        .unwrap_or(0)
}

/// Total flow entering a node
pub fn inflow(flows: &FlowMap, node: &FlowNode) -> i64 {
    flows
        .iter()
        .filter(|((_, to), _)| to == node)
        .map(|(_, flow)| *flow)
        .sum()
}

/// Total flow leaving a node
pub fn outflow(flows: &FlowMap, node: &FlowNode) -> i64 {
    flows
        .iter()
        .filter(|((from, _), _)| from == node)
        .map(|(_, flow)| *flow)
        .sum()
}

/// Fixed-point conversion between money and solver units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    places: u32,
}

impl Scale {
    /// Largest unit count the solver works with. Leaves headroom so sums
    /// of capacities and flows stay within `i64`.
    pub const MAX_UNITS: i64 = i64::MAX >> 8;

    /// Keep `places` decimal places
    pub fn new(places: u32) -> Self {
        Self { places }
    }

    fn factor(self) -> Decimal {
        Decimal::from(10i64.pow(self.places))
    }

    fn exact_units(self, amount: Decimal) -> Option<i64> {
        amount
            .checked_mul(self.factor())
            .and_then(|scaled| scaled.floor().to_i64())
            .filter(|units| units.abs() <= Self::MAX_UNITS)
    }

    /// Money to units, rounded down so a limit is never exceeded.
    /// Amounts beyond [`Scale::MAX_UNITS`] saturate, which is only
    /// suitable for capacities.
    pub fn to_units(self, amount: Decimal) -> i64 {
        self.exact_units(amount).unwrap_or(if amount < Decimal::ZERO {
            -Self::MAX_UNITS
        } else {
            Self::MAX_UNITS
        })
    }

    /// Money to units, failing when the amount can't be represented
    pub fn checked_units(self, amount: Decimal) -> Result<i64> {
        self.exact_units(amount)
            .ok_or(Error::AmountOutOfRange { amount, scale: self.places })
    }

    /// Bound to a capacity; unbounded stays `None`
    pub fn capacity(self, bound: Bound) -> Option<i64> {
        bound.finite().map(|value| self.to_units(value))
    }

    /// Units back to money
    pub fn to_money(self, units: i64) -> Decimal {
        Decimal::from(units) / self.factor()
    }
}

/// Directed network with find-or-create nodes and at most one edge per
/// ordered node pair
#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    graph: FlowGraph,
    index: HashMap<FlowNode, NodeIndex>,
}

impl FlowNetwork {
    /// Empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Find existing node or create it
    pub fn node(&mut self, node: FlowNode) -> NodeIndex {
        if let Some(index) = self.index.get(&node) {
            return *index;
        }
        let index = self.graph.add_node(node.clone());
        self.index.insert(node, index);
        index
    }

    /// Index of an existing node
    pub fn find(&self, node: &FlowNode) -> Option<NodeIndex> {
        self.index.get(node).copied()
    }

    /// Add an edge, or replace the existing one between the same nodes
    pub fn set_edge(&mut self, from: FlowNode, to: FlowNode, capacity: Option<i64>, cost: i64) -> EdgeIndex {
        if let Some(capacity) = capacity {
            assert!(
                capacity >= 0,
                "negative capacity {} on edge {:?} -> {:?}",
                capacity,
                from,
                to
            );
        }
        let from = self.node(from);
        let to = self.node(to);
        self.graph.update_edge(from, to, FlowEdge { capacity, cost })
    }

    /// Change the capacity of an existing edge, keeping its cost.
    /// Returns whether anything changed.
    pub fn set_capacity(&mut self, from: &FlowNode, to: &FlowNode, capacity: Option<i64>) -> bool {
        let edge = match (self.find(from), self.find(to)) {
            (Some(from), Some(to)) => self.graph.find_edge(from, to),
            _ => None,
        };
        match edge.and_then(|edge| self.graph.edge_weight_mut(edge)) {
            Some(weight) if weight.capacity != capacity => {
                if let Some(capacity) = capacity {
                    assert!(capacity >= 0, "negative capacity {}", capacity);
                }
                weight.capacity = capacity;
                true
            }
            _ => false,
        }
    }

    /// Edge between two nodes
    pub fn edge(&self, from: &FlowNode, to: &FlowNode) -> Option<FlowEdge> {
        let from = self.find(from)?;
        let to = self.find(to)?;
        let edge = self.graph.find_edge(from, to)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Underlying graph
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_scale_floors() {
        let scale = Scale::new(2);
        assert_eq!(scale.to_units(dec!(12.349)), 1234);
        assert_eq!(scale.to_money(1234), dec!(12.34));
        assert_eq!(scale.capacity(Bound::Unbounded), None);
        assert_eq!(scale.capacity(Bound::Finite(dec!(1))), Some(100));
    }

    #[test]
    fn test_oversized_amount_rejected_not_clamped() {
        let scale = Scale::new(2);
        assert!(matches!(
            scale.checked_units(dec!(100000000000000000)),
            Err(Error::AmountOutOfRange { .. })
        ));
        assert_eq!(scale.checked_units(dec!(1000.25)).unwrap(), 100_025);
        assert_eq!(scale.to_units(dec!(100000000000000000)), Scale::MAX_UNITS);
        assert_eq!(Scale::new(8).to_units(Decimal::MAX), Scale::MAX_UNITS);
    }

    #[test]
    fn test_set_edge_keeps_graph_simple() {
        let mut network = FlowNetwork::new();
        network.set_edge(FlowNode::Source, FlowNode::Sink, Some(10), 0);
        network.set_edge(FlowNode::Source, FlowNode::Sink, Some(20), 3);

        assert_eq!(network.edge_count(), 1);
        assert_eq!(network.node_count(), 2);
        assert_eq!(
            network.edge(&FlowNode::Source, &FlowNode::Sink),
            Some(FlowEdge { capacity: Some(20), cost: 3 })
        );
    }

    #[test]
    fn test_set_capacity_reports_change() {
        let mut network = FlowNetwork::new();
        network.set_edge(FlowNode::Source, FlowNode::Sink, Some(10), 1);
        assert!(!network.set_capacity(&FlowNode::Source, &FlowNode::Sink, Some(10)));
        assert!(network.set_capacity(&FlowNode::Source, &FlowNode::Sink, None));
        assert_eq!(network.edge(&FlowNode::Source, &FlowNode::Sink).unwrap().cost, 1);
    }

    #[test]
    #[should_panic(expected = "negative capacity")]
    fn test_negative_capacity_is_a_fault() {
        let mut network = FlowNetwork::new();
        network.set_edge(FlowNode::Source, FlowNode::Sink, Some(-1), 0);
    }
}
