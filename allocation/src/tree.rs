//! Priority trees
//!
//! Callers describe their allocation policy as a [`PriorityNode`].
//! [`PriorityTree::compile`] validates it once and flattens it into
//! positions numbered in pre-order, which every later stage indexes
//! into instead of re-walking the recursive structure.

use crate::account::AccountHandle;
use crate::types::{AccountId, LimitKind, Polarity};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Index of a position in a compiled tree; the root is 0
pub type PositionId = usize;

/// Accounts treated as one leaf, typically members of a link group
#[derive(Debug, Clone)]
pub struct LinkedGroup {
    members: Vec<AccountHandle>,
}

impl LinkedGroup {
    /// Create from member accounts
    pub fn new(members: Vec<AccountHandle>) -> Self {
        Self { members }
    }

    /// Member accounts
    pub fn members(&self) -> &[AccountHandle] {
        &self.members
    }
}

/// What a leaf allocates to
#[derive(Debug, Clone)]
pub enum LeafTarget {
    /// A single account
    Account(AccountHandle),
    /// Several accounts filled as one unit
    Group(LinkedGroup),
}

impl LeafTarget {
    /// Accounts reached by this leaf
    pub fn accounts(&self) -> Vec<AccountHandle> {
        match self {
            LeafTarget::Account(account) => vec![account.clone()],
            LeafTarget::Group(group) => group.members().to_vec(),
        }
    }
}

/// Caps on the total flow through a subtree (magnitudes)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLimits(BTreeMap<LimitKind, Decimal>);

impl NodeLimits {
    /// No caps
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cap
    pub fn with(mut self, kind: LimitKind, amount: Decimal) -> Self {
        self.0.insert(kind, amount);
        self
    }

    /// Cap for one kind
    pub fn get(&self, kind: LimitKind) -> Option<Decimal> {
        self.0.get(&kind).copied()
    }

    /// Maximum cap for a polarity
    pub fn max_for(&self, polarity: Polarity) -> Option<Decimal> {
        self.get(LimitKind::max_for(polarity))
    }

    /// Minimum cap for a polarity
    pub fn min_for(&self, polarity: Polarity) -> Option<Decimal> {
        self.get(LimitKind::min_for(polarity))
    }
}

/// Caller-built allocation policy
#[derive(Debug, Clone)]
pub enum PriorityNode {
    /// An account or linked group
    Leaf(LeafTarget),
    /// Fill children strictly in order
    Ordered(Vec<PriorityNode>),
    /// Split between children proportionally to positive weights
    Weighted(Vec<(PriorityNode, Decimal)>),
    /// Cap the flow through a subtree
    Limited(Box<PriorityNode>, NodeLimits),
}

impl PriorityNode {
    /// Leaf for one account
    pub fn account(account: AccountHandle) -> Self {
        PriorityNode::Leaf(LeafTarget::Account(account))
    }

    /// Leaf for a group of accounts
    pub fn group(members: Vec<AccountHandle>) -> Self {
        PriorityNode::Leaf(LeafTarget::Group(LinkedGroup::new(members)))
    }

    /// Ordered node
    pub fn ordered(children: Vec<PriorityNode>) -> Self {
        PriorityNode::Ordered(children)
    }

    /// Weighted node
    pub fn weighted(children: Vec<(PriorityNode, Decimal)>) -> Self {
        PriorityNode::Weighted(children)
    }

    /// Limited node
    pub fn limited(child: PriorityNode, limits: NodeLimits) -> Self {
        PriorityNode::Limited(Box::new(child), limits)
    }

    /// Structural identity, used to reject duplicate weighted keys
    fn signature(&self) -> String {
        match self {
            PriorityNode::Leaf(LeafTarget::Account(account)) => account.id().to_string(),
            PriorityNode::Leaf(LeafTarget::Group(group)) => {
                let ids: Vec<_> = group.members().iter().map(|a| a.id().to_string()).collect();
                format!("group({})", ids.join(","))
            }
            PriorityNode::Ordered(children) => {
                let sigs: Vec<_> = children.iter().map(|c| c.signature()).collect();
                format!("[{}]", sigs.join(","))
            }
            PriorityNode::Weighted(children) => {
                let sigs: Vec<_> = children
                    .iter()
                    .map(|(c, w)| format!("{}:{}", c.signature(), w.normalize()))
                    .collect();
                format!("{{{}}}", sigs.join(","))
            }
            PriorityNode::Limited(child, limits) => {
                format!("limited({:?},{})", limits.0, child.signature())
            }
        }
    }
}

impl From<AccountHandle> for PriorityNode {
    fn from(account: AccountHandle) -> Self {
        PriorityNode::account(account)
    }
}

/// A flattened tree position
#[derive(Debug, Clone)]
pub enum Position {
    /// Leaf
    Leaf(LeafTarget),
    /// Ordered children
    Ordered(Vec<PositionId>),
    /// Weighted children
    Weighted(Vec<(PositionId, Decimal)>),
    /// Limited subtree
    Limited(PositionId, NodeLimits),
}

/// Validated, flattened priority tree
#[derive(Debug, Clone)]
pub struct PriorityTree {
    positions: Vec<Position>,
    parents: Vec<Option<PositionId>>,
    accounts: Vec<AccountHandle>,
    leaves: HashMap<AccountId, Vec<PositionId>>,
}

impl PriorityTree {
    /// Validate and flatten
    pub fn compile(root: &PriorityNode) -> Result<Self> {
        match root {
            PriorityNode::Ordered(children) if children.is_empty() => {
                return Err(Error::InvalidTree("top-level ordered node is empty".to_string()));
            }
            PriorityNode::Weighted(children) if children.is_empty() => {
                return Err(Error::InvalidTree("top-level weighted node is empty".to_string()));
            }
            _ => {}
        }

        let mut tree = Self {
            positions: Vec::new(),
            parents: Vec::new(),
            accounts: Vec::new(),
            leaves: HashMap::new(),
        };
        tree.flatten(root, None)?;
        Ok(tree)
    }

    fn flatten(&mut self, node: &PriorityNode, parent: Option<PositionId>) -> Result<PositionId> {
        let id = self.positions.len();
        // Placeholder until children are numbered
        self.positions.push(Position::Ordered(Vec::new()));
        self.parents.push(parent);

        let position = match node {
            PriorityNode::Leaf(target) => {
                if let LeafTarget::Group(group) = target {
                    if group.members().is_empty() {
                        return Err(Error::InvalidTree("linked group has no members".to_string()));
                    }
                }
                for account in target.accounts() {
                    let leaves = self.leaves.entry(account.id().clone()).or_default();
                    if leaves.is_empty() {
                        self.accounts.push(account.clone());
                    }
                    leaves.push(id);
                }
                Position::Leaf(target.clone())
            }
            PriorityNode::Ordered(children) => {
                let mut ids = Vec::with_capacity(children.len());
                for child in children {
                    ids.push(self.flatten(child, Some(id))?);
                }
                Position::Ordered(ids)
            }
            PriorityNode::Weighted(children) => {
                let mut seen = HashSet::new();
                let mut ids = Vec::with_capacity(children.len());
                for (child, weight) in children {
                    if *weight <= Decimal::ZERO {
                        return Err(Error::InvalidTree(format!(
                            "weight {} is not positive",
                            weight
                        )));
                    }
                    if !seen.insert(child.signature()) {
                        return Err(Error::InvalidTree(format!(
                            "duplicate weighted child {}",
                            child.signature()
                        )));
                    }
                    ids.push((self.flatten(child, Some(id))?, *weight));
                }
                Position::Weighted(ids)
            }
            PriorityNode::Limited(child, limits) => {
                if let Some((kind, amount)) = limits.0.iter().find(|(_, v)| **v < Decimal::ZERO) {
                    return Err(Error::InvalidTree(format!(
                        "negative {} limit {}",
                        kind, amount
                    )));
                }
                let child_id = self.flatten(child, Some(id))?;
                Position::Limited(child_id, limits.clone())
            }
        };
        self.positions[id] = position;
        Ok(id)
    }

    /// Root position
    pub fn root(&self) -> PositionId {
        0
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the tree has no positions (never true once compiled)
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position by id
    pub fn position(&self, id: PositionId) -> &Position {
        &self.positions[id]
    }

    /// Parent of a position
    pub fn parent(&self, id: PositionId) -> Option<PositionId> {
        self.parents[id]
    }

    /// Child positions, in declaration order
    pub fn children(&self, id: PositionId) -> Vec<PositionId> {
        match &self.positions[id] {
            Position::Leaf(_) => Vec::new(),
            Position::Ordered(children) => children.clone(),
            Position::Weighted(children) => children.iter().map(|(c, _)| *c).collect(),
            Position::Limited(child, _) => vec![*child],
        }
    }

    /// Weights of a weighted position
    pub fn weights(&self, id: PositionId) -> Option<&[(PositionId, Decimal)]> {
        match &self.positions[id] {
            Position::Weighted(children) => Some(children),
            _ => None,
        }
    }

    /// Limits of a limited position
    pub fn limits(&self, id: PositionId) -> Option<&NodeLimits> {
        match &self.positions[id] {
            Position::Limited(_, limits) => Some(limits),
            _ => None,
        }
    }

    /// Distinct accounts in first-appearance (pre-order) order
    pub fn accounts(&self) -> &[AccountHandle] {
        &self.accounts
    }

    /// Leaf positions referencing an account
    pub fn leaf_positions(&self, account: &AccountId) -> &[PositionId] {
        self.leaves.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ancestors of a position, nearest first
    pub fn ancestors(&self, id: PositionId) -> Vec<PositionId> {
        let mut ancestors = Vec::new();
        let mut current = self.parents[id];
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parents[parent];
        }
        ancestors
    }

    /// Limited positions at or above `id`
    pub fn limited_ancestors(&self, id: PositionId) -> Vec<PositionId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .filter(|p| self.limits(*p).is_some())
            .collect()
    }

    /// Weighted positions in breadth-first order
    pub fn weighted_breadth_first(&self) -> Vec<PositionId> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.root()]);
        while let Some(id) = queue.pop_front() {
            if self.weights(id).is_some() {
                order.push(id);
            }
            queue.extend(self.children(id));
        }
        order
    }

    /// Positions in the subtree rooted at `id`, `id` first
    pub fn subtree(&self, id: PositionId) -> Vec<PositionId> {
        let mut positions = vec![id];
        let mut index = 0;
        while index < positions.len() {
            positions.extend(self.children(positions[index]));
            index += 1;
        }
        positions
    }
}
