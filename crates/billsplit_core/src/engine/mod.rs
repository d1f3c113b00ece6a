//! Pure share-normalization and settlement engine.
//!
//! # Responsibility
//! - Resolve raw member claims into normalized item partitions.
//! - Derive per-member costs, bill totals, lifecycle status and ledger views.
//!
//! # Invariants
//! - Engine functions hold no state between calls and perform no I/O.
//! - Every division is guarded; degenerate inputs surface as
//!   `EngineError::DegenerateAllocation` instead of panicking.
//! - Money and shares are rounded to `MONEY_SCALE` places, half to even.

use rust_decimal::{Decimal, RoundingStrategy};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod aggregator;
pub mod allocator;
pub mod ledger;
pub mod normalizer;
pub mod status;

/// Decimal places kept for shares and money.
pub const MONEY_SCALE: u32 = 2;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by engine computations and input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A required even split has no recipients.
    DegenerateAllocation { item: String },
    /// Raw share outside `[0, 1]`.
    InvalidShareValue { value: Decimal },
    /// Share references an item missing from the bill catalog.
    UnknownItemReference { item: String },
    /// Mutation targets a bill that is already settled.
    StaleMutation { bill: String },
    /// Catalog item whose unit cost is negative or overflows cost arithmetic.
    InvalidUnitCost { item: String, unit_cost: Decimal },
    /// Submitted partition does not sum to one within the rounding slack.
    UnbalancedPartition { item: String, total: Decimal },
    /// The same member appears twice in one item's partition.
    DuplicateClaimant { item: String, username: String },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateAllocation { item } => {
                write!(f, "degenerate allocation for item `{item}`")
            }
            Self::InvalidShareValue { value } => {
                write!(f, "share value {value} is outside [0, 1]")
            }
            Self::UnknownItemReference { item } => write!(f, "unknown item reference: `{item}`"),
            Self::StaleMutation { bill } => write!(f, "bill `{bill}` is settled and immutable"),
            Self::InvalidUnitCost { item, unit_cost } => {
                write!(f, "item `{item}` has invalid unit cost {unit_cost}")
            }
            Self::UnbalancedPartition { item, total } => {
                write!(f, "shares of item `{item}` sum to {total}, not 1")
            }
            Self::DuplicateClaimant { item, username } => {
                write!(f, "`{username}` is listed twice on item `{item}`")
            }
        }
    }
}

impl Error for EngineError {}

/// Rounds a share or amount to `MONEY_SCALE` places, half to even.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}
