//! Core types for the allocation engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Account identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fractional instant within a period, in [0, 1]
pub type Time = Decimal;

/// Time series of signed amounts (time -> amount)
pub type Schedule = BTreeMap<Time, Decimal>;

/// Time series of capacity limits (time -> bound)
pub type LimitSchedule = BTreeMap<Time, Bound>;

/// Direction of money movement relative to the accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    /// Contribution into accounts
    Inflow,
    /// Withdrawal or payment out of accounts
    Outflow,
}

impl Polarity {
    /// Polarity implied by the sign of a total; `None` when zero
    pub fn of(total: Decimal) -> Option<Self> {
        if total > Decimal::ZERO {
            Some(Polarity::Inflow)
        } else if total < Decimal::ZERO {
            Some(Polarity::Outflow)
        } else {
            None
        }
    }

    /// Apply this polarity's sign to a non-negative magnitude
    pub fn signed(self, magnitude: Decimal) -> Decimal {
        match self {
            Polarity::Inflow => magnitude,
            Polarity::Outflow => -magnitude,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Inflow => write!(f, "inflow"),
            Polarity::Outflow => write!(f, "outflow"),
        }
    }
}

/// The four capacity kinds an account reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LimitKind {
    /// Mandatory contribution
    MinInflow,
    /// Contribution room
    MaxInflow,
    /// Mandatory withdrawal
    MinOutflow,
    /// Withdrawable amount
    MaxOutflow,
}

impl LimitKind {
    /// All kinds, in declaration order
    pub const ALL: [LimitKind; 4] = [
        LimitKind::MinInflow,
        LimitKind::MaxInflow,
        LimitKind::MinOutflow,
        LimitKind::MaxOutflow,
    ];

    /// Minimum kind for a polarity
    pub fn min_for(polarity: Polarity) -> Self {
        match polarity {
            Polarity::Inflow => LimitKind::MinInflow,
            Polarity::Outflow => LimitKind::MinOutflow,
        }
    }

    /// Maximum kind for a polarity
    pub fn max_for(polarity: Polarity) -> Self {
        match polarity {
            Polarity::Inflow => LimitKind::MaxInflow,
            Polarity::Outflow => LimitKind::MaxOutflow,
        }
    }

    /// Whether this is a minimum (mandatory) kind
    pub fn is_min(self) -> bool {
        matches!(self, LimitKind::MinInflow | LimitKind::MinOutflow)
    }

    /// Polarity this kind applies to
    pub fn polarity(self) -> Polarity {
        match self {
            LimitKind::MinInflow | LimitKind::MaxInflow => Polarity::Inflow,
            LimitKind::MinOutflow | LimitKind::MaxOutflow => Polarity::Outflow,
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::MinInflow => "min_inflow",
            LimitKind::MaxInflow => "max_inflow",
            LimitKind::MinOutflow => "min_outflow",
            LimitKind::MaxOutflow => "max_outflow",
        };
        write!(f, "{}", name)
    }
}

/// A capacity value that may be unconstrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    /// Limited to this magnitude
    Finite(Decimal),
    /// No limit
    Unbounded,
}

impl Bound {
    /// Zero capacity
    pub const ZERO: Bound = Bound::Finite(Decimal::ZERO);

    /// Whether the bound is unconstrained
    pub fn is_unbounded(self) -> bool {
        matches!(self, Bound::Unbounded)
    }

    /// Finite value, if any
    pub fn finite(self) -> Option<Decimal> {
        match self {
            Bound::Finite(value) => Some(value),
            Bound::Unbounded => None,
        }
    }

    /// Magnitude of a finite bound; unbounded stays unbounded
    pub fn abs(self) -> Bound {
        match self {
            Bound::Finite(value) => Bound::Finite(value.abs()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    /// Smaller of two bounds
    pub fn min(self, other: Bound) -> Bound {
        match (self, other) {
            (Bound::Unbounded, b) | (b, Bound::Unbounded) => b,
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a.min(b)),
        }
    }

    /// Sum of two bounds
    pub fn add(self, other: Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a + b),
            _ => Bound::Unbounded,
        }
    }

    /// Subtract, flooring at zero
    pub fn saturating_sub(self, amount: Decimal) -> Bound {
        match self {
            Bound::Finite(value) => Bound::Finite((value - amount).max(Decimal::ZERO)),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    /// Whether `amount` fits within the bound
    pub fn admits(self, amount: Decimal) -> bool {
        match self {
            Bound::Finite(value) => amount <= value,
            Bound::Unbounded => true,
        }
    }

    /// Sum of the values of a limit schedule
    pub fn total(schedule: &LimitSchedule) -> Bound {
        schedule
            .values()
            .fold(Bound::ZERO, |acc, bound| acc.add(*bound))
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Finite(value) => write!(f, "{}", value),
            Bound::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl From<Decimal> for Bound {
    fn from(value: Decimal) -> Self {
        Bound::Finite(value)
    }
}

/// Add `added` into `base` instant by instant
pub fn add_schedules(base: &mut Schedule, added: &Schedule) {
    for (time, amount) in added {
        *base.entry(*time).or_insert(Decimal::ZERO) += *amount;
    }
}

/// Sum of a schedule's amounts
pub fn schedule_total(schedule: &Schedule) -> Decimal {
    schedule.values().copied().sum()
}

/// Result of one allocation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Direction of this allocation
    pub polarity: Polarity,

    /// Signed amount requested
    pub requested: Decimal,

    /// Magnitude allocated by the minimum pass
    pub minimum_total: Decimal,

    /// Magnitude allocated by the maximum pass
    pub maximum_total: Decimal,

    /// Signed, dated amounts per account
    pub transactions: BTreeMap<AccountId, Schedule>,
}

impl Allocation {
    /// Empty allocation (nothing requested)
    pub fn empty(polarity: Polarity, requested: Decimal) -> Self {
        Self {
            polarity,
            requested,
            minimum_total: Decimal::ZERO,
            maximum_total: Decimal::ZERO,
            transactions: BTreeMap::new(),
        }
    }

    /// Signed total actually allocated
    pub fn allocated(&self) -> Decimal {
        self.polarity
            .signed(self.minimum_total + self.maximum_total)
    }

    /// Signed total for one account
    pub fn account_total(&self, id: &AccountId) -> Decimal {
        self.transactions
            .get(id)
            .map(schedule_total)
            .unwrap_or(Decimal::ZERO)
    }

    /// Signed amount for one account at one instant
    pub fn amount_at(&self, id: &AccountId, time: Time) -> Decimal {
        self.transactions
            .get(id)
            .and_then(|schedule| schedule.get(&time).copied())
            .unwrap_or(Decimal::ZERO)
    }

    /// Unallocated magnitude of the request
    pub fn shortfall(&self) -> Decimal {
        (self.requested.abs() - self.allocated().abs()).max(Decimal::ZERO)
    }
}
