//! Share records flowing through the settlement engine.
//!
//! # Responsibility
//! - Represent raw member claims with an explicit auto-split variant.
//! - Represent normalized shares and the per-member costs derived from them.
//!
//! # Invariants
//! - A raw share value of exactly zero means "split evenly" and maps to
//!   `ShareMode::Auto`, never to "owns nothing".
//! - `ShareMode::Fixed` values lie in `(0, 1]`.

use crate::engine::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw claim of one member on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ShareMode {
    /// Member asked for an explicit fraction of the item.
    Fixed(Decimal),
    /// Member takes an even part of whatever the fixed claims leave.
    Auto,
}

impl ShareMode {
    /// Converts a raw share from the `[0, 1]` input range.
    ///
    /// # Errors
    /// - `EngineError::InvalidShareValue` when `raw` is outside `[0, 1]`.
    pub fn from_raw(raw: Decimal) -> Result<Self, EngineError> {
        if raw < Decimal::ZERO || raw > Decimal::ONE {
            return Err(EngineError::InvalidShareValue { value: raw });
        }
        if raw.is_zero() {
            Ok(Self::Auto)
        } else {
            Ok(Self::Fixed(raw))
        }
    }

    /// Raw numeric form, with `Auto` mapped back to zero.
    pub fn raw_value(self) -> Decimal {
        match self {
            Self::Fixed(value) => value,
            Self::Auto => Decimal::ZERO,
        }
    }

    pub fn fixed_value(self) -> Option<Decimal> {
        match self {
            Self::Fixed(value) => Some(value),
            Self::Auto => None,
        }
    }

    pub fn is_auto(self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// One member's claim on one item, as supplied by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareAssignment {
    pub username: String,
    pub item: String,
    pub mode: ShareMode,
}

impl ShareAssignment {
    pub fn new(username: impl Into<String>, item: impl Into<String>, mode: ShareMode) -> Self {
        Self {
            username: username.into(),
            item: item.into(),
            mode,
        }
    }
}

/// Resolved fraction of an item owned by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedShare {
    pub username: String,
    pub share: Decimal,
}

/// Monetary cost of one member's normalized share of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserItemCost {
    pub username: String,
    pub item: String,
    pub share: Decimal,
    pub cost: Decimal,
}
