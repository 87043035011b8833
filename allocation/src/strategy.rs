//! Transaction strategies
//!
//! Builds priority trees from account categories, putting debts in
//! repayment order.

use crate::account::{AccountHandle, DebtTerms};
use crate::engine::AllocationEngine;
use crate::tree::PriorityNode;
use crate::types::{Allocation, Schedule};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How category weights are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Weights are ranks; lowest is filled first
    Ordered,
    /// Weights are proportions
    Weighted,
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Ordered" => Ok(StrategyKind::Ordered),
            "Weighted" => Ok(StrategyKind::Weighted),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Ordered => write!(f, "Ordered"),
            StrategyKind::Weighted => write!(f, "Weighted"),
        }
    }
}

/// Order in which debts are repaid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebtStrategy {
    /// Highest interest rate first
    #[default]
    Avalanche,
    /// Smallest balance first
    Snowball,
}

impl FromStr for DebtStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Avalanche" => Ok(DebtStrategy::Avalanche),
            "Snowball" => Ok(DebtStrategy::Snowball),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl DebtStrategy {
    /// Sort debts into repayment order. Ties keep their input order.
    pub fn order(self, debts: &mut [(AccountHandle, DebtTerms)]) {
        match self {
            DebtStrategy::Avalanche => debts.sort_by(|a, b| b.1.rate.cmp(&a.1.rate)),
            DebtStrategy::Snowball => debts.sort_by(|a, b| a.1.balance.abs().cmp(&b.1.balance.abs())),
        }
    }

    /// Ordered tree of debts, or `None` if there are none
    pub fn priority(self, debts: &[(AccountHandle, DebtTerms)]) -> Option<PriorityNode> {
        if debts.is_empty() {
            return None;
        }
        let mut debts = debts.to_vec();
        self.order(&mut debts);
        Some(PriorityNode::ordered(
            debts.into_iter().map(|(account, _)| PriorityNode::account(account)).collect(),
        ))
    }
}

/// Category-driven priority tree builder
#[derive(Debug, Clone)]
pub struct TransactionStrategy {
    /// How weights are interpreted
    pub kind: StrategyKind,
    /// Weight (or rank) per account category
    pub weights: BTreeMap<String, Decimal>,
    /// Debt repayment order
    pub debt_strategy: DebtStrategy,
    /// Debts at or above this rate are repaid before everything else;
    /// without a threshold all debts are low-interest
    pub high_interest_threshold: Option<Decimal>,
}

impl TransactionStrategy {
    /// Create a strategy
    pub fn new(kind: StrategyKind, weights: BTreeMap<String, Decimal>) -> Self {
        Self {
            kind,
            weights,
            debt_strategy: DebtStrategy::default(),
            high_interest_threshold: None,
        }
    }

    /// Set the debt strategy
    pub fn with_debt_strategy(mut self, debt_strategy: DebtStrategy) -> Self {
        self.debt_strategy = debt_strategy;
        self
    }

    /// Set the high-interest threshold
    pub fn with_high_interest_threshold(mut self, threshold: Decimal) -> Self {
        self.high_interest_threshold = Some(threshold);
        self
    }

    /// Outstanding debts as (low-interest, high-interest)
    fn divide_debts(
        &self,
        accounts: &[AccountHandle],
    ) -> (Vec<(AccountHandle, DebtTerms)>, Vec<(AccountHandle, DebtTerms)>) {
        accounts
            .iter()
            .filter_map(|account| {
                account
                    .debt_terms()
                    .filter(DebtTerms::is_outstanding)
                    .map(|terms| (account.clone(), terms))
            })
            .partition(|(_, terms)| match self.high_interest_threshold {
                Some(threshold) => terms.rate < threshold,
                None => true,
            })
    }

    /// Build the priority tree for `accounts`.
    ///
    /// Accounts whose category has no weight are left out, as are debts
    /// with nothing owing.
    pub fn priority(&self, accounts: &[AccountHandle]) -> Result<PriorityNode> {
        let (low_interest, high_interest) = self.divide_debts(accounts);
        let is_high = |account: &AccountHandle| high_interest.iter().any(|(debt, _)| debt.id() == account.id());
        let is_low = |account: &AccountHandle| low_interest.iter().any(|(debt, _)| debt.id() == account.id());

        // Group by category, in first-appearance order
        let mut groups: Vec<(String, Decimal, Vec<AccountHandle>)> = Vec::new();
        for account in accounts {
            if is_high(account) {
                continue;
            }
            if account.debt_terms().is_some() && !is_low(account) {
                // Debt with nothing owing
                continue;
            }
            let category = account.category();
            let weight = match self.weights.get(category) {
                Some(weight) => *weight,
                None => continue,
            };
            match groups.iter_mut().find(|(name, _, _)| name.as_str() == category) {
                Some((_, _, members)) => members.push(account.clone()),
                None => groups.push((category.to_string(), weight, vec![account.clone()])),
            }
        }

        if groups.is_empty() && high_interest.is_empty() {
            return Err(Error::InvalidTree(
                "no account matches a strategy weight".to_string(),
            ));
        }

        let subtree = |members: &[AccountHandle]| -> PriorityNode {
            let debts: Vec<_> = low_interest
                .iter()
                .filter(|(debt, _)| members.iter().any(|m| m.id() == debt.id()))
                .cloned()
                .collect();
            if debts.len() == members.len() && debts.len() > 1 {
                if let Some(ordered) = self.debt_strategy.priority(&debts) {
                    return ordered;
                }
            }
            match members {
                [single] => PriorityNode::account(single.clone()),
                _ => PriorityNode::weighted(
                    members
                        .iter()
                        .map(|m| (PriorityNode::account(m.clone()), Decimal::ONE))
                        .collect(),
                ),
            }
        };

        let mut priority = match self.kind {
            StrategyKind::Ordered => {
                let mut ranked: Vec<_> = groups.iter().collect();
                ranked.sort_by(|a, b| a.1.cmp(&b.1));
                PriorityNode::ordered(ranked.into_iter().map(|(_, _, members)| subtree(members.as_slice())).collect())
            }
            StrategyKind::Weighted => PriorityNode::weighted(
                groups
                    .iter()
                    .map(|(_, weight, members)| (subtree(members.as_slice()), *weight))
                    .collect(),
            ),
        };

        if let Some(high) = self.debt_strategy.priority(&high_interest) {
            priority = PriorityNode::ordered(vec![high, priority]);
        }

        debug!(
            strategy = %self.kind,
            groups = groups.len(),
            high_interest = high_interest.len(),
            low_interest = low_interest.len(),
            "Priority tree built"
        );
        Ok(priority)
    }

    /// Build the tree for `accounts` and allocate `available` across it
    pub fn allocate(
        &self,
        engine: &AllocationEngine,
        available: &Schedule,
        accounts: &[AccountHandle],
    ) -> Result<Allocation> {
        let priority = self.priority(accounts)?;
        engine.allocate(available, &priority)
    }
}
