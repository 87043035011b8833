//! Maximum-flow pass
//!
//! Routes the residual amount through the remaining capacity at minimum
//! priority cost, then rebalances weighted positions.

use crate::minimum::MinimumGrants;
use crate::network::{outflow, solve, FlowMap, FlowNetwork, FlowNode, GraphBuilder, Rebalancer, Scale};
use crate::resolver::CapacitySnapshot;
use crate::tree::PriorityTree;
use tracing::debug;

/// Final flows of the maximum pass
#[derive(Debug, Clone)]
pub struct MaximumFlows {
    /// Flow per edge
    pub flows: FlowMap,
    /// Total routed, in units
    pub total: i64,
    /// The network the flows were solved on
    pub network: FlowNetwork,
}

/// Run the maximum pass for `grants.residual` units
pub fn assign_maximums(
    tree: &PriorityTree,
    snapshot: &CapacitySnapshot,
    grants: &MinimumGrants,
    scale: Scale,
    max_rebalance_rounds: usize,
) -> MaximumFlows {
    let limit = grants.residual.max(0);
    let builder = GraphBuilder::new(tree, snapshot, grants, scale);
    let mut network = builder.build(limit);

    if limit == 0 {
        return MaximumFlows {
            flows: FlowMap::new(),
            total: 0,
            network,
        };
    }

    let initial = solve(&network, limit);
    let (flows, solves) = Rebalancer::new(&builder, max_rebalance_rounds).run(&mut network, initial, limit);
    let total = outflow(&flows, &FlowNode::Source);

    debug!(
        requested = limit,
        routed = total,
        nodes = network.node_count(),
        edges = network.edge_count(),
        rebalance_solves = solves,
        "Maximum pass complete"
    );

    MaximumFlows {
        flows,
        total,
        network,
    }
}
