//! Timing distributions
//!
//! A [`Timing`] maps fractional instants of a period (0 = start, 1 = end)
//! to relative weights describing when transactions happen.

use crate::types::{Schedule, Time};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Default instant within each period
pub const WHEN_DEFAULT: Decimal = Decimal::from_parts(5, 0, 0, false, 1); // 0.5

/// When, within each period, a transaction occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct When(Decimal);

impl When {
    /// Start of the period
    pub const START: When = When(Decimal::ZERO);
    /// End of the period
    pub const END: When = When(Decimal::ONE);

    /// Create from a fraction in [0, 1]
    pub fn new(fraction: Decimal) -> Result<Self> {
        if fraction < Decimal::ZERO || fraction > Decimal::ONE {
            return Err(Error::Timing(format!("when {} must be in [0, 1]", fraction)));
        }
        Ok(Self(fraction))
    }

    /// Fraction of the period
    pub fn value(self) -> Decimal {
        self.0
    }
}

impl Default for When {
    fn default() -> Self {
        When(WHEN_DEFAULT)
    }
}

impl FromStr for When {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(When::START),
            "end" => Ok(When::END),
            other => {
                let fraction = Decimal::from_str(other)
                    .map_err(|e| Error::Timing(format!("when '{}': {}", other, e)))?;
                When::new(fraction)
            }
        }
    }
}

/// Number of transactions per period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency(u32);

impl Frequency {
    /// Create from an explicit count
    pub fn new(count: u32) -> Result<Self> {
        if count == 0 {
            return Err(Error::Timing("frequency must be greater than 0".to_string()));
        }
        Ok(Self(count))
    }

    /// Number of periods
    pub fn count(self) -> u32 {
        self.0
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency(1)
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let count = match s {
            "D" => 365,
            "W" => 52,
            "BW" => 26,
            "SM" => 24,
            "M" => 12,
            "BM" => 6,
            "Q" => 4,
            "SA" => 2,
            "A" => 1,
            other => other
                .parse::<u32>()
                .map_err(|_| Error::Timing(format!("unknown frequency '{}'", other)))?,
        };
        Frequency::new(count)
    }
}

/// Mapping of instants to relative weights
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing(BTreeMap<Time, Decimal>);

impl Timing {
    /// `frequency` equally-weighted instants, each at `when` within
    /// its own sub-period
    pub fn new(when: When, frequency: Frequency) -> Self {
        let periods = Decimal::from(frequency.count());
        let weight = Decimal::ONE / periods;
        let instants = (0..frequency.count())
            .map(|i| ((Decimal::from(i) + when.value()) / periods, weight))
            .collect();
        Self(instants)
    }

    /// Build from explicit weights
    pub fn from_weights(weights: BTreeMap<Time, Decimal>) -> Result<Self> {
        if let Some((time, weight)) = weights.iter().find(|(_, w)| **w < Decimal::ZERO) {
            return Err(Error::Timing(format!(
                "negative weight {} at t={}",
                weight, time
            )));
        }
        Ok(Self(weights))
    }

    /// Derive a timing from a schedule of signed transactions.
    ///
    /// Single-signed schedules are used as their magnitudes. Mixed
    /// schedules net out: a net inflow yields the largest amounts that
    /// can be taken at each instant without overdrawing any later
    /// balance, a net outflow yields the smallest top-ups that keep the
    /// running balance non-negative.
    pub fn from_schedule(schedule: &Schedule) -> Self {
        if schedule.is_empty() {
            return Self::default();
        }
        if schedule.values().all(|v| v.is_zero()) {
            return Self(schedule.keys().map(|t| (*t, Decimal::ONE)).collect());
        }
        if schedule.values().all(|v| *v >= Decimal::ZERO) {
            return Self(schedule.clone());
        }
        if schedule.values().all(|v| *v <= Decimal::ZERO) {
            return Self(schedule.iter().map(|(t, v)| (*t, -*v)).collect());
        }

        let total: Decimal = schedule.values().copied().sum();
        if total > Decimal::ZERO {
            Self(accumulate_inflows(schedule))
        } else if total < Decimal::ZERO {
            Self(accumulate_outflows(schedule))
        } else {
            Self::default()
        }
    }

    /// Instants with their weights
    pub fn iter(&self) -> impl Iterator<Item = (&Time, &Decimal)> {
        self.0.iter()
    }

    /// Instants, ascending
    pub fn times(&self) -> impl Iterator<Item = Time> + '_ {
        self.0.keys().copied()
    }

    /// Weight of one instant (zero if absent)
    pub fn weight(&self, time: Time) -> Decimal {
        self.0.get(&time).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of weights
    pub fn total_weight(&self) -> Decimal {
        self.0.values().copied().sum()
    }

    /// Number of instants
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no instants
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same proportions, weights summing to one
    pub fn normalized(&self) -> Self {
        let total = self.total_weight();
        if total.is_zero() {
            return self.clone();
        }
        Self(self.0.iter().map(|(t, w)| (*t, *w / total)).collect())
    }

    /// Split `total` across the instants proportionally to their
    /// weights. The last weighted instant absorbs rounding so the
    /// result sums to `total` exactly.
    pub fn time_series(&self, total: Decimal) -> Schedule {
        let weight_sum = self.total_weight();
        let mut series = Schedule::new();
        if weight_sum.is_zero() {
            return series;
        }

        let mut assigned = Decimal::ZERO;
        let last = self.0.iter().rev().find(|(_, w)| !w.is_zero()).map(|(t, _)| *t);
        for (time, weight) in &self.0 {
            if weight.is_zero() {
                continue;
            }
            let amount = if Some(*time) == last {
                total - assigned
            } else {
                total * *weight / weight_sum
            };
            assigned += amount;
            series.insert(*time, amount);
        }
        series
    }
}

impl From<BTreeMap<Time, Decimal>> for Timing {
    fn from(weights: BTreeMap<Time, Decimal>) -> Self {
        Self(weights)
    }
}

/// Largest withdrawal at each instant that keeps every later running
/// balance non-negative
fn accumulate_inflows(schedule: &Schedule) -> BTreeMap<Time, Decimal> {
    let mut running = Decimal::ZERO;
    let mut accum: BTreeMap<Time, Decimal> = schedule
        .iter()
        .map(|(t, v)| {
            running += *v;
            (*t, running)
        })
        .collect();

    let mut result = BTreeMap::new();
    let times: Vec<Time> = accum.keys().copied().collect();
    for time in times {
        let bottleneck = accum
            .range(time..)
            .map(|(_, v)| *v)
            .min()
            .unwrap_or(Decimal::ZERO);
        if bottleneck > Decimal::ZERO {
            result.insert(time, bottleneck);
            for (_, value) in accum.range_mut(time..) {
                *value -= bottleneck;
            }
        }
    }
    result
}

/// Smallest contribution at each instant that brings a negative running
/// balance back to zero
fn accumulate_outflows(schedule: &Schedule) -> BTreeMap<Time, Decimal> {
    let mut running = Decimal::ZERO;
    let mut result = BTreeMap::new();
    for (time, value) in schedule {
        running += *value;
        if running < Decimal::ZERO {
            result.insert(*time, -running);
            running = Decimal::ZERO;
        }
    }
    result
}
