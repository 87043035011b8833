// Solver Module - Successive shortest path min-cost flow

use super::{FlowMap, FlowNetwork, FlowNode};
use petgraph::visit::EdgeRef;
use tracing::debug;

/// Arc of the residual graph. Edge `k` of the network owns arcs `2k`
/// (forward) and `2k + 1` (backward).
#[derive(Debug, Clone, Copy)]
struct ResidualArc {
    from: usize,
    to: usize,
    residual: Option<i64>,
    cost: i64,
}

impl ResidualArc {
    fn open(&self) -> bool {
        self.residual.map_or(true, |r| r > 0)
    }
}

/// Route up to `limit` units from source to sink at minimum total cost.
///
/// Shortest paths are found with Bellman-Ford over the residual graph,
/// relaxing arcs in edge-index order with strict improvement only, so
/// equal-cost alternatives resolve to the earliest-added edge.
pub fn solve(network: &FlowNetwork, limit: i64) -> FlowMap {
    let graph = network.graph();
    let (source, sink) = match (network.find(&FlowNode::Source), network.find(&FlowNode::Sink)) {
        (Some(source), Some(sink)) => (source.index(), sink.index()),
        _ => return FlowMap::new(),
    };

    let mut arcs = Vec::with_capacity(graph.edge_count() * 2);
    for edge in graph.edge_references() {
        let weight = edge.weight();
        arcs.push(ResidualArc {
            from: edge.source().index(),
            to: edge.target().index(),
            residual: weight.capacity,
            cost: weight.cost,
        });
        arcs.push(ResidualArc {
            from: edge.target().index(),
            to: edge.source().index(),
            residual: Some(0),
            cost: -weight.cost,
        });
    }

    let node_count = graph.node_count();
    let mut remaining = limit.max(0);
    let mut augmentations = 0usize;
    let mut total_cost = 0i64;

    while remaining > 0 {
        let mut dist: Vec<Option<i64>> = vec![None; node_count];
        let mut via: Vec<Option<usize>> = vec![None; node_count];
        dist[source] = Some(0);

        for _ in 1..node_count.max(2) {
            let mut changed = false;
            for (index, arc) in arcs.iter().enumerate() {
                if !arc.open() {
                    continue;
                }
                let base = match dist[arc.from] {
                    Some(base) => base,
                    None => continue,
                };
                let candidate = base + arc.cost;
                if dist[arc.to].map_or(true, |current| candidate < current) {
                    dist[arc.to] = Some(candidate);
                    via[arc.to] = Some(index);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let path_cost = match dist[sink] {
            Some(cost) => cost,
            None => break,
        };

        // Walk back from the sink collecting the path
        let mut path = Vec::new();
        let mut node = sink;
        while node != source {
            let index = match via[node] {
                Some(index) => index,
                None => break,
            };
            path.push(index);
            node = arcs[index].from;
        }
        if node != source {
            break;
        }

        let amount = path
            .iter()
            .filter_map(|index| arcs[*index].residual)
            .fold(remaining, i64::min);
        if amount == 0 {
            break;
        }

        for index in &path {
            if let Some(residual) = arcs[*index].residual.as_mut() {
                *residual -= amount;
            }
            if let Some(residual) = arcs[*index ^ 1].residual.as_mut() {
                *residual += amount;
            }
        }

        remaining -= amount;
        total_cost = total_cost.saturating_add(amount.saturating_mul(path_cost));
        augmentations += 1;
    }

    let mut flows = FlowMap::new();
    for (k, edge) in graph.edge_references().enumerate() {
        let flow = arcs[2 * k + 1].residual.unwrap_or(0);
        if flow > 0 {
            flows.insert((graph[edge.source()].clone(), graph[edge.target()].clone()), flow);
        }
    }

    debug!(
        requested = limit,
        routed = limit.max(0) - remaining,
        augmentations,
        cost = total_cost,
        "Min-cost flow solved"
    );
    flows
}
