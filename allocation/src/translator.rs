//! Flow-to-transaction translation
//!
//! Converts solver flows back into signed, dated amounts per account.

use crate::maximum::MaximumFlows;
use crate::minimum::MinimumGrants;
use crate::network::graph_builder::split_by_weight;
use crate::network::{flow_on, outflow, FlowNode, Scale};
use crate::resolver::CapacitySnapshot;
use crate::timing::Timing;
use crate::tree::{LeafTarget, Position, PriorityTree};
use crate::types::{AccountId, Bound, Schedule, Time};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Per-account maximum-pass units, with group leaves re-split by each
/// member's own remaining capacity
pub fn account_flows(
    tree: &PriorityTree,
    snapshot: &CapacitySnapshot,
    grants: &MinimumGrants,
    maximum: &MaximumFlows,
    scale: Scale,
) -> BTreeMap<AccountId, i64> {
    let mut flows: BTreeMap<AccountId, i64> = tree
        .accounts()
        .iter()
        .map(|account| {
            let id = account.id().clone();
            let flow = outflow(&maximum.flows, &FlowNode::Account(id.clone()));
            (id, flow)
        })
        .collect();

    for position in 0..tree.len() {
        let group = match tree.position(position) {
            Position::Leaf(LeafTarget::Group(group)) => group,
            _ => continue,
        };
        let members: Vec<AccountId> = group.members().iter().map(|m| m.id().clone()).collect();

        // Only groups whose members share one pool (or none) and are
        // reached from this leaf alone can be re-split safely
        let pools: Vec<_> = members
            .iter()
            .map(|id| snapshot.account(id).and_then(|c| c.max_pool))
            .collect();
        if pools.windows(2).any(|pair| pair[0] != pair[1]) {
            continue;
        }
        if members.iter().any(|id| tree.leaf_positions(id) != [position]) {
            continue;
        }

        let capacities: Option<Vec<i64>> = members
            .iter()
            .map(|id| {
                snapshot.account(id).and_then(|c| {
                    scale
                        .capacity(c.max_total)
                        .map(|max| (max - grants.grant(id)).max(0))
                })
            })
            .collect();
        let capacities = match capacities {
            Some(capacities) if capacities.iter().fold(0i64, |sum, c| sum.saturating_add(*c)) > 0 => capacities,
            _ => continue,
        };

        let from = FlowNode::Position(position);
        let total: i64 = members
            .iter()
            .map(|id| flow_on(&maximum.flows, &from, &FlowNode::Account(id.clone())))
            .sum();
        let weighted: Vec<_> = capacities
            .iter()
            .enumerate()
            .map(|(index, capacity)| (index, Decimal::from(*capacity), 0))
            .collect();
        for (index, share) in split_by_weight(total, &weighted) {
            flows.insert(members[index].clone(), share);
        }
    }
    flows
}

/// Spread `total` over the timing's weights without exceeding any
/// instant's room (`None` = unbounded), moving excess to instants that
/// still have room
pub fn water_fill(timing: &Timing, room: &BTreeMap<Time, Option<Decimal>>, total: Decimal) -> Schedule {
    let mut result = Schedule::new();
    let mut remaining = total;
    let mut active: BTreeMap<Time, Decimal> = timing
        .iter()
        .filter(|(time, weight)| {
            !weight.is_zero() && room.get(*time).copied().unwrap_or(Some(Decimal::ZERO)) != Some(Decimal::ZERO)
        })
        .map(|(time, weight)| (*time, *weight))
        .collect();

    while remaining > Decimal::ZERO && !active.is_empty() {
        let weight_sum: Decimal = active.values().copied().sum();
        let capped: Vec<(Time, Decimal)> = active
            .iter()
            .filter_map(|(time, weight)| match room.get(time).copied().flatten() {
                Some(limit) if remaining * *weight / weight_sum > limit => Some((*time, limit)),
                _ => None,
            })
            .collect();

        if capped.is_empty() {
            for (time, amount) in Timing::from(active).time_series(remaining) {
                *result.entry(time).or_insert(Decimal::ZERO) += amount;
            }
            remaining = Decimal::ZERO;
            break;
        }
        for (time, limit) in capped {
            let limit = limit.max(Decimal::ZERO);
            *result.entry(time).or_insert(Decimal::ZERO) += limit;
            remaining -= limit;
            active.remove(&time);
        }
    }

    if remaining > Decimal::ZERO {
        if let Some(time) = timing.times().last() {
            warn!(%remaining, t = %time, "No room left for amount, placing on last instant");
            *result.entry(time).or_insert(Decimal::ZERO) += remaining;
        }
    }
    result
}

/// Account that takes the part of the request lost when money was
/// floored to solver units: the last account, in tree order, that
/// received something and still has room for `residue` under its own
/// maximum, its shared pool and every limited ancestor
pub fn residue_recipient(
    tree: &PriorityTree,
    snapshot: &CapacitySnapshot,
    totals: &BTreeMap<AccountId, Decimal>,
    residue: Decimal,
) -> Option<AccountId> {
    let total_of = |id: &AccountId| totals.get(id).copied().unwrap_or(Decimal::ZERO);

    tree.accounts().iter().rev().map(|account| account.id()).find(|id| {
        let capacity = match snapshot.account(id) {
            Some(capacity) => capacity,
            None => return false,
        };
        let total = total_of(id);
        if total.is_zero() || !capacity.max_total.admits(total + residue) {
            return false;
        }
        if let Some(pool) = capacity.max_pool {
            let pool = snapshot.pool(pool);
            let used: Decimal = pool.members.iter().map(&total_of).sum();
            if !pool.limit.admits(used + residue) {
                return false;
            }
        }
        tree.leaf_positions(id).iter().all(|leaf| {
            tree.ancestors(*leaf).into_iter().all(|ancestor| {
                let limit = match tree.limits(ancestor).and_then(|l| l.max_for(snapshot.polarity)) {
                    Some(limit) => limit,
                    None => return true,
                };
                let mut below: Vec<AccountId> = Vec::new();
                for position in tree.subtree(ancestor) {
                    if let Position::Leaf(target) = tree.position(position) {
                        for member in target.accounts() {
                            if !below.contains(member.id()) {
                                below.push(member.id().clone());
                            }
                        }
                    }
                }
                let used: Decimal = below.iter().map(&total_of).sum();
                used + residue <= limit
            })
        })
    })
    .cloned()
}

/// Signed, dated amounts per account for one allocation. `residue` is
/// money below one solver unit, given to [`residue_recipient`] if any.
pub fn translate(
    tree: &PriorityTree,
    snapshot: &CapacitySnapshot,
    grants: &MinimumGrants,
    maximum: &MaximumFlows,
    scale: Scale,
    residue: Decimal,
) -> BTreeMap<AccountId, Schedule> {
    let flows = account_flows(tree, snapshot, grants, maximum, scale);
    let mut transactions = BTreeMap::new();

    let recipient = if residue > Decimal::ZERO {
        let totals: BTreeMap<AccountId, Decimal> = tree
            .accounts()
            .iter()
            .map(|account| {
                let id = account.id();
                let units = grants.grant(id) + flows.get(id).copied().unwrap_or(0);
                (id.clone(), scale.to_money(units))
            })
            .collect();
        let recipient = residue_recipient(tree, snapshot, &totals, residue);
        if recipient.is_none() {
            debug!(%residue, "No account has room for the rounding residue");
        }
        recipient
    } else {
        None
    };

    for account in tree.accounts() {
        let id = account.id();
        let capacity = match snapshot.account(id) {
            Some(capacity) => capacity,
            None => continue,
        };

        // Minimum part follows the account's own minimum schedule
        let minimum = scale.to_money(grants.grant(id));
        let min_weights: BTreeMap<Time, Decimal> = capacity
            .min
            .iter()
            .filter_map(|(time, bound)| bound.finite().map(|value| (*time, value)))
            .collect();
        let min_part = if minimum.is_zero() {
            Schedule::new()
        } else {
            Timing::from(min_weights).time_series(minimum)
        };

        // Maximum part follows the caller's timing, within what the
        // minimum part left at each instant
        let mut maximum_amount = scale.to_money(flows.get(id).copied().unwrap_or(0));
        if recipient.as_ref() == Some(id) {
            maximum_amount += residue;
        }
        let room: BTreeMap<Time, Option<Decimal>> = snapshot
            .timing
            .times()
            .map(|time| {
                let used = min_part.get(&time).copied().unwrap_or(Decimal::ZERO);
                let room = match capacity.max_at(time) {
                    Bound::Finite(max) => Some((max - used).max(Decimal::ZERO)),
                    Bound::Unbounded => None,
                };
                (time, room)
            })
            .collect();
        let max_part = if maximum_amount.is_zero() {
            Schedule::new()
        } else {
            water_fill(&snapshot.timing, &room, maximum_amount)
        };

        let mut schedule = Schedule::new();
        for (time, amount) in min_part.into_iter().chain(max_part) {
            *schedule.entry(time).or_insert(Decimal::ZERO) += amount;
        }
        schedule.retain(|_, amount| !amount.is_zero());
        if schedule.is_empty() {
            continue;
        }
        for amount in schedule.values_mut() {
            *amount = snapshot.polarity.signed(*amount);
        }
        transactions.insert(id.clone(), schedule);
    }
    transactions
}
