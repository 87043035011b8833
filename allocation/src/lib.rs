//! Allocation Engine
//!
//! Splits an amount of money to move (a contribution or a withdrawal)
//! across a prioritized set of accounts, respecting each account's
//! capacity, limits shared by linked accounts, and the caller's priority
//! policy.
//!
//! # Architecture
//!
//! One call runs these stages in order:
//!
//! 1. **Resolve**: read account capacities once and group linked accounts into shared pools
//! 2. **Minimums**: grant mandatory amounts (e.g. minimum debt payments) first
//! 3. **Maximums**: route the rest through a min-cost flow network built from the priority tree
//! 4. **Rebalance**: re-split weighted nodes by the flow they actually receive
//! 5. **Translate**: turn flows into signed, dated amounts per account
//!
//! # Priority Trees
//!
//! - `Ordered` children are filled strictly in order
//! - `Weighted` children split proportionally, shortfall redistributed among siblings
//! - `Limited` caps the flow through a subtree
//!
//! # Example
//!
//! ```no_run
//! use allocation::{AllocationEngine, BasicAccount, Config, LimitKind, PriorityNode};
//! use rust_decimal::Decimal;
//! use std::collections::BTreeMap;
//!
//! fn main() -> allocation::Result<()> {
//!     let engine = AllocationEngine::new(Config::default())?;
//!
//!     let rrsp = BasicAccount::new("rrsp")
//!         .with_limit(LimitKind::MaxInflow, Decimal::from(100))
//!         .into_handle();
//!     let savings = BasicAccount::new("savings").into_handle();
//!     let tree = PriorityNode::ordered(vec![rrsp.into(), savings.into()]);
//!
//!     let available = BTreeMap::from([(Decimal::new(5, 1), Decimal::from(200))]);
//!     let allocation = engine.allocate_and_apply(&available, &tree)?;
//!     println!("Allocated {} across {} accounts",
//!              allocation.allocated(), allocation.transactions.len());
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod config;
pub mod timing;
pub mod link;
pub mod account;
pub mod tree;
pub mod resolver;
/// Flow network construction and solving
pub mod network;
pub mod minimum;
pub mod maximum;
pub mod translator;
pub mod engine;
pub mod strategy;

// Re-exports
pub use account::{Account, AccountHandle, BasicAccount, DebtTerms};
pub use config::Config;
pub use engine::AllocationEngine;
pub use error::{Error, Result};
pub use link::{LinkKey, LinkRecord, LinkRegistry};
pub use strategy::{DebtStrategy, StrategyKind, TransactionStrategy};
pub use timing::{Frequency, Timing, When};
pub use tree::{LeafTarget, LinkedGroup, NodeLimits, PriorityNode, PriorityTree};
pub use types::{AccountId, Allocation, Bound, LimitKind, Polarity, Schedule};
