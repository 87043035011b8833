//! Account boundary
//!
//! The engine only talks to accounts through the [`Account`] trait.
//! [`BasicAccount`] is a table-driven implementation for callers that
//! don't model their own capacity formulas.

use crate::link::{LinkKey, LinkRecord};
use crate::timing::Timing;
use crate::types::{add_schedules, schedule_total, AccountId, Bound, LimitKind, LimitSchedule, Polarity, Schedule};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Interest terms of a debt account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtTerms {
    /// Annual interest rate (0.05 = 5%)
    pub rate: Decimal,
    /// Current balance; negative while money is owed
    pub balance: Decimal,
}

impl DebtTerms {
    /// Whether a balance is still owing
    pub fn is_outstanding(&self) -> bool {
        self.balance < Decimal::ZERO
    }
}

/// A money-holding account as seen by the engine.
///
/// Inflow schedules are non-negative and outflow schedules are
/// non-positive. Unconstrained capacity is reported as
/// [`Bound::Unbounded`].
pub trait Account: Send + Sync + fmt::Debug {
    /// Stable identity
    fn id(&self) -> &AccountId;

    /// Largest contribution per instant
    fn max_inflow(&self, timing: &Timing) -> LimitSchedule;

    /// Mandatory contribution per instant
    fn min_inflow(&self, timing: &Timing) -> LimitSchedule;

    /// Largest withdrawal per instant
    fn max_outflow(&self, timing: &Timing) -> LimitSchedule;

    /// Mandatory withdrawal per instant
    fn min_outflow(&self, timing: &Timing) -> LimitSchedule;

    /// Link group this account shares `kind` capacity with, if any
    fn link(&self, _kind: LimitKind) -> Option<LinkKey> {
        None
    }

    /// Record the final signed, dated amounts of one allocation
    fn apply(&self, schedule: &Schedule);

    /// Category used by strategies to look up weights
    fn category(&self) -> &str {
        "Account"
    }

    /// Interest terms, for accounts that are debts
    fn debt_terms(&self) -> Option<DebtTerms> {
        None
    }
}

/// Shared handle to an account
pub type AccountHandle = Arc<dyn Account>;

/// Query one capacity kind
pub fn limits(account: &dyn Account, kind: LimitKind, timing: &Timing) -> LimitSchedule {
    match kind {
        LimitKind::MinInflow => account.min_inflow(timing),
        LimitKind::MaxInflow => account.max_inflow(timing),
        LimitKind::MinOutflow => account.min_outflow(timing),
        LimitKind::MaxOutflow => account.max_outflow(timing),
    }
}

/// Account with a fixed per-period limit table.
///
/// Finite limits are spread across the timing's weights. A kind that is
/// linked reads its total from the shared [`LinkRecord`] instead of the
/// table. Mins default to zero and maxes to unbounded.
#[derive(Debug)]
pub struct BasicAccount {
    id: AccountId,
    category: String,
    limits: RwLock<BTreeMap<LimitKind, Bound>>,
    links: BTreeMap<LimitKind, Arc<LinkRecord>>,
    debt: Option<DebtTerms>,
    history: RwLock<Vec<Schedule>>,
}

impl BasicAccount {
    /// Create an account with default limits
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(id),
            category: "Account".to_string(),
            limits: RwLock::new(BTreeMap::new()),
            links: BTreeMap::new(),
            debt: None,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Set the per-period total for one kind (magnitude)
    pub fn with_limit(self, kind: LimitKind, limit: impl Into<Bound>) -> Self {
        self.limits.write().insert(kind, limit.into().abs());
        self
    }

    /// Share one kind's limit with a link group
    pub fn with_link(mut self, kind: LimitKind, record: Arc<LinkRecord>) -> Self {
        self.links.insert(kind, record);
        self
    }

    /// Set the strategy category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Mark as a debt
    pub fn with_debt(mut self, terms: DebtTerms) -> Self {
        self.debt = Some(terms);
        self
    }

    /// Wrap in a handle
    pub fn into_handle(self) -> AccountHandle {
        Arc::new(self)
    }

    /// Per-period total currently reported for `kind`
    pub fn limit(&self, kind: LimitKind) -> Bound {
        if let Some(record) = self.links.get(&kind) {
            return record.limit();
        }
        self.limits
            .read()
            .get(&kind)
            .copied()
            .unwrap_or(if kind.is_min() { Bound::ZERO } else { Bound::Unbounded })
    }

    /// Schedules applied so far, oldest first
    pub fn history(&self) -> Vec<Schedule> {
        self.history.read().clone()
    }

    /// All applied amounts merged by instant
    pub fn transactions(&self) -> Schedule {
        let mut merged = Schedule::new();
        for schedule in self.history.read().iter() {
            add_schedules(&mut merged, schedule);
        }
        merged
    }

    fn spread(&self, kind: LimitKind, timing: &Timing) -> LimitSchedule {
        let sign = match kind.polarity() {
            Polarity::Inflow => Decimal::ONE,
            Polarity::Outflow => Decimal::NEGATIVE_ONE,
        };
        match self.limit(kind) {
            Bound::Unbounded => timing
                .iter()
                .filter(|(_, weight)| !weight.is_zero())
                .map(|(time, _)| (*time, Bound::Unbounded))
                .collect(),
            Bound::Finite(total) => timing
                .time_series(total)
                .into_iter()
                .map(|(time, amount)| (time, Bound::Finite(amount * sign)))
                .collect(),
        }
    }
}

impl Account for BasicAccount {
    fn id(&self) -> &AccountId {
        &self.id
    }

    fn max_inflow(&self, timing: &Timing) -> LimitSchedule {
        self.spread(LimitKind::MaxInflow, timing)
    }

    fn min_inflow(&self, timing: &Timing) -> LimitSchedule {
        self.spread(LimitKind::MinInflow, timing)
    }

    fn max_outflow(&self, timing: &Timing) -> LimitSchedule {
        self.spread(LimitKind::MaxOutflow, timing)
    }

    fn min_outflow(&self, timing: &Timing) -> LimitSchedule {
        self.spread(LimitKind::MinOutflow, timing)
    }

    fn link(&self, kind: LimitKind) -> Option<LinkKey> {
        self.links.get(&kind).map(|record| record.key().clone())
    }

    fn apply(&self, schedule: &Schedule) {
        let total = schedule_total(schedule);
        if let Some(polarity) = Polarity::of(total) {
            let amount = total.abs();
            let mut consumed: Vec<&LinkKey> = Vec::new();
            for kind in [LimitKind::min_for(polarity), LimitKind::max_for(polarity)] {
                match self.links.get(&kind) {
                    // One record shared by both kinds is consumed once
                    Some(record) if consumed.contains(&record.key()) => {}
                    Some(record) => {
                        record.consume(amount);
                        consumed.push(record.key());
                    }
                    None => {
                        if let Some(limit) = self.limits.write().get_mut(&kind) {
                            *limit = limit.saturating_sub(amount);
                        }
                    }
                }
            }
        }

        debug!(account = %self.id, total = %total, "Schedule applied");
        self.history.write().push(schedule.clone());
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn debt_terms(&self) -> Option<DebtTerms> {
        self.debt
    }
}
