//! Error types for the allocation engine

use crate::types::{AccountId, LimitKind};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for allocation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Allocation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Priority tree rejected before graph construction
    #[error("Invalid priority tree: {0}")]
    InvalidTree(String),

    /// Account reported a minimum above its maximum
    #[error(
        "Contradictory {kind} limits for account {account} at t={time}: min {min} exceeds max {max}"
    )]
    ContradictoryLimits {
        /// Offending account
        account: AccountId,
        /// Polarity's minimum kind
        kind: LimitKind,
        /// Instant at which the contradiction occurs
        time: Decimal,
        /// Reported minimum magnitude
        min: Decimal,
        /// Reported maximum magnitude
        max: Decimal,
    },

    /// Amount too large for the solver at the configured scale
    #[error("Amount {amount} cannot be represented at {scale} decimal places")]
    AmountOutOfRange {
        /// Offending amount
        amount: Decimal,
        /// Configured scale
        scale: u32,
    },

    /// Timing or frequency could not be interpreted
    #[error("Invalid timing: {0}")]
    Timing(String),

    /// Unknown strategy name
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
