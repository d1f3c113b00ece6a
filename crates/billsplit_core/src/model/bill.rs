//! Bill, item and member records.
//!
//! # Responsibility
//! - Define the canonical bill aggregate loaded from and written to storage.
//! - Validate names and catalog values before persistence.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another bill.
//! - `name` is unique across bills; item `name` is unique within a bill.
//! - `unit_cost` is never negative.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$").expect("valid username regex"));
static CONTROL_CHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{Cc}").expect("valid control char regex"));

const MAX_NAME_CHARS: usize = 120;

/// Largest accepted item unit cost, in whole currency units.
pub const MAX_UNIT_COST: i64 = 1_000_000_000;

/// Stable identifier of a bill row.
pub type BillId = Uuid;

/// Lifecycle state of a bill.
///
/// `Open`, `Pending` and `Ready` are derived from member lock flags;
/// `Settled` is terminal and only reachable through finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    /// No members attached.
    Open,
    /// At least one member still edits their shares.
    Pending,
    /// Every attached member has locked.
    Ready,
    /// Finalized; costs and shares are frozen.
    Settled,
}

impl BillStatus {
    /// Storage/wire spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Settled => "settled",
        }
    }

    /// Parses the storage spelling produced by [`BillStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "settled" => Some(Self::Settled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Settled
    }
}

impl Display for BillStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchasable line on a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique within the owning bill.
    pub name: String,
    /// Cost split between claimants. Serialized as `cost` to match the
    /// catalog shape used by callers.
    #[serde(rename = "cost")]
    pub unit_cost: Decimal,
    pub quantity: u32,
    /// Free-form category tag, serialized as `type`.
    #[serde(rename = "type")]
    pub category: String,
}

impl Item {
    pub fn new(
        name: impl Into<String>,
        unit_cost: Decimal,
        quantity: u32,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            unit_cost,
            quantity,
            category: category.into(),
        }
    }
}

/// A user's participation in one bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    /// Member finished editing their shares.
    pub locked: bool,
    pub paid: bool,
    /// Settled total. Zero until the bill is finalized.
    pub amount: Decimal,
}

impl Member {
    /// Creates an unlocked, unpaid member with a zero amount.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            locked: false,
            paid: false,
            amount: Decimal::ZERO,
        }
    }
}

/// Canonical bill aggregate: catalog plus members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub uuid: BillId,
    pub name: String,
    pub group: String,
    pub status: BillStatus,
    /// Catalog order is preserved from creation.
    pub items: Vec<Item>,
    /// Members in join order.
    pub members: Vec<Member>,
}

impl Bill {
    /// Creates an `Open` bill without members and a generated stable ID.
    pub fn new(name: impl Into<String>, group: impl Into<String>, items: Vec<Item>) -> Self {
        Self::with_id(Uuid::new_v4(), name, group, items)
    }

    /// Creates an `Open` bill with a caller-provided stable ID.
    pub fn with_id(
        uuid: BillId,
        name: impl Into<String>,
        group: impl Into<String>,
        items: Vec<Item>,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            group: group.into(),
            status: BillStatus::Open,
            items,
            members: Vec::new(),
        }
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn member(&self, username: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.username == username)
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validates names and catalog values.
    ///
    /// # Errors
    /// - Blank or control-character names for the bill, its group or items.
    /// - Negative unit cost, or one above `MAX_UNIT_COST`.
    /// - Duplicate item names.
    /// - Malformed member usernames.
    pub fn validate(&self) -> Result<(), BillValidationError> {
        validate_name("bill", &self.name)?;
        validate_name("group", &self.group)?;

        let mut seen = HashSet::new();
        for item in &self.items {
            validate_name("item", &item.name)?;
            if item.unit_cost < Decimal::ZERO {
                return Err(BillValidationError::NegativeUnitCost {
                    item: item.name.clone(),
                });
            }
            if item.unit_cost > Decimal::from(MAX_UNIT_COST) {
                return Err(BillValidationError::UnitCostTooLarge {
                    item: item.name.clone(),
                });
            }
            if !seen.insert(item.name.as_str()) {
                return Err(BillValidationError::DuplicateItemName {
                    item: item.name.clone(),
                });
            }
        }

        for member in &self.members {
            validate_username(&member.username)?;
        }

        Ok(())
    }
}

/// Validation failures for bill catalog and member input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillValidationError {
    /// Name is blank, too long or contains control characters.
    InvalidName { field: &'static str, value: String },
    /// Username does not match the accepted pattern.
    InvalidUsername(String),
    NegativeUnitCost { item: String },
    UnitCostTooLarge { item: String },
    DuplicateItemName { item: String },
}

impl Display for BillValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName { field, value } => write!(f, "invalid {field} name: `{value}`"),
            Self::InvalidUsername(value) => write!(f, "invalid username: `{value}`"),
            Self::NegativeUnitCost { item } => {
                write!(f, "item `{item}` has a negative unit cost")
            }
            Self::UnitCostTooLarge { item } => {
                write!(f, "item `{item}` costs more than {MAX_UNIT_COST}")
            }
            Self::DuplicateItemName { item } => write!(f, "duplicate item name: `{item}`"),
        }
    }
}

impl Error for BillValidationError {}

/// Checks one username against the accepted pattern.
pub fn validate_username(username: &str) -> Result<(), BillValidationError> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(BillValidationError::InvalidUsername(username.to_string()))
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), BillValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed.chars().count() > MAX_NAME_CHARS
        || CONTROL_CHAR_RE.is_match(value)
    {
        return Err(BillValidationError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
