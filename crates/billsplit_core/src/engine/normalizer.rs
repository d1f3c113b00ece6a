//! Share normalization: raw claims to a partition of each item.
//!
//! # Responsibility
//! - Reconcile fixed and auto claims on one item into shares summing to one.
//! - Group bill-wide assignments by catalog item.
//! - Check manager-submitted partitions before they replace normalization.
//!
//! # Invariants
//! - Rounding to two places happens at each resolution step, not only at
//!   the end, so results are reproducible bit-for-bit.
//! - Items without claimants resolve to an empty share list and are still
//!   listed.
//! - Fixed claims are corrected additively when no auto claimant exists;
//!   with auto claimants and fixed claims reaching one, fixed claims are
//!   rescaled towards the per-capita unit. Results outside `[0, 1]` for
//!   extreme inputs are reproduced, not clamped.

use crate::engine::{round_money, EngineError, EngineResult};
use crate::model::bill::Item;
use crate::model::share::{NormalizedShare, ShareAssignment, ShareMode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rounding slack tolerated per claimant when checking a partition (0.005).
pub fn partition_tolerance_per_claimant() -> Decimal {
    Decimal::new(5, 3)
}

/// One member's raw claim on the item being normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim<'a> {
    pub username: &'a str,
    pub mode: ShareMode,
}

impl<'a> Claim<'a> {
    pub fn new(username: &'a str, mode: ShareMode) -> Self {
        Self { username, mode }
    }
}

/// Normalized shares of one catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemShares {
    pub name: String,
    pub users: Vec<NormalizedShare>,
}

impl ItemShares {
    /// Absolute distance of the share sum from one. Zero for empty items.
    pub fn partition_slack(&self) -> Decimal {
        if self.users.is_empty() {
            return Decimal::ZERO;
        }
        let total: Decimal = self.users.iter().map(|user| user.share).sum();
        (total - Decimal::ONE).abs()
    }

    /// Whether the share sum lies within the per-claimant rounding slack.
    pub fn is_balanced(&self) -> bool {
        let tolerance = partition_tolerance_per_claimant() * Decimal::from(self.users.len());
        self.partition_slack() <= tolerance
    }
}

/// Normalizes the claims on one item.
///
/// Output keeps claim order.
///
/// # Errors
/// - `EngineError::DegenerateAllocation` when a required even split has no
///   recipients.
pub fn normalize_item(item: &str, claims: &[Claim<'_>]) -> EngineResult<Vec<NormalizedShare>> {
    if claims.is_empty() {
        return Ok(Vec::new());
    }

    let specified_count = claims.iter().filter(|claim| !claim.mode.is_auto()).count();
    let auto_count = claims.len() - specified_count;
    let total_specified: Decimal = claims
        .iter()
        .filter_map(|claim| claim.mode.fixed_value())
        .sum();

    let shares: Vec<Decimal> = if auto_count == 0 {
        if total_specified == Decimal::ONE {
            claims.iter().map(|claim| claim.mode.raw_value()).collect()
        } else {
            let change = even_split(item, Decimal::ONE - total_specified, specified_count)?;
            claims
                .iter()
                .map(|claim| round_money(claim.mode.raw_value() + change))
                .collect()
        }
    } else if total_specified < Decimal::ONE {
        let auto_share = round_money(even_split(
            item,
            Decimal::ONE - total_specified,
            auto_count,
        )?);
        claims
            .iter()
            .map(|claim| match claim.mode {
                ShareMode::Fixed(value) => value,
                ShareMode::Auto => auto_share,
            })
            .collect()
    } else {
        let excess = if total_specified > Decimal::ONE {
            even_split(item, Decimal::ONE - total_specified, specified_count)?
        } else {
            Decimal::ZERO
        };
        let unit = even_split(item, Decimal::ONE, specified_count + auto_count)?;
        let specified = Decimal::from(specified_count);
        claims
            .iter()
            .map(|claim| match claim.mode {
                ShareMode::Fixed(value) => round_money((value + excess) * unit * specified),
                ShareMode::Auto => round_money(unit),
            })
            .collect()
    };

    Ok(claims
        .iter()
        .zip(shares)
        .map(|(claim, share)| NormalizedShare {
            username: claim.username.to_string(),
            share,
        })
        .collect())
}

/// Checks a partition submitted as already normalized.
///
/// Every share must lie in `[0, 1]`, each member may appear once, and a
/// non-empty partition must sum to one within the per-claimant slack. Zero
/// is a real share here, not an auto claim.
pub fn check_partition(shares: &ItemShares) -> EngineResult<()> {
    for (idx, user) in shares.users.iter().enumerate() {
        if user.share < Decimal::ZERO || user.share > Decimal::ONE {
            return Err(EngineError::InvalidShareValue { value: user.share });
        }
        if shares.users[..idx]
            .iter()
            .any(|other| other.username == user.username)
        {
            return Err(EngineError::DuplicateClaimant {
                item: shares.name.clone(),
                username: user.username.clone(),
            });
        }
    }

    if !shares.is_balanced() {
        return Err(EngineError::UnbalancedPartition {
            item: shares.name.clone(),
            total: shares.users.iter().map(|user| user.share).sum(),
        });
    }
    Ok(())
}

/// Normalizes every catalog item of a bill.
///
/// Items are returned in catalog order, including items nobody claimed.
///
/// # Errors
/// - `EngineError::UnknownItemReference` when an assignment names an item
///   missing from `catalog`.
/// - `EngineError::DegenerateAllocation` from [`normalize_item`].
pub fn normalize_bill(
    catalog: &[Item],
    assignments: &[ShareAssignment],
) -> EngineResult<Vec<ItemShares>> {
    normalize_bill_with(catalog, assignments, &[])
}

/// Like [`normalize_bill`], but items present in `resolved` take that
/// partition verbatim instead of normalizing their raw claims.
///
/// # Errors
/// - `EngineError::UnknownItemReference` when an assignment or a resolved
///   partition names an item missing from `catalog`.
/// - `EngineError::DegenerateAllocation` from [`normalize_item`].
pub fn normalize_bill_with(
    catalog: &[Item],
    assignments: &[ShareAssignment],
    resolved: &[ItemShares],
) -> EngineResult<Vec<ItemShares>> {
    let referenced = assignments
        .iter()
        .map(|assignment| &assignment.item)
        .chain(resolved.iter().map(|shares| &shares.name));
    for name in referenced {
        if !catalog.iter().any(|item| &item.name == name) {
            return Err(EngineError::UnknownItemReference { item: name.clone() });
        }
    }

    catalog
        .iter()
        .map(|item| {
            if let Some(fixed) = resolved.iter().find(|shares| shares.name == item.name) {
                return Ok(fixed.clone());
            }
            let claims: Vec<Claim<'_>> = assignments
                .iter()
                .filter(|assignment| assignment.item == item.name)
                .map(|assignment| Claim::new(assignment.username.as_str(), assignment.mode))
                .collect();
            Ok(ItemShares {
                name: item.name.clone(),
                users: normalize_item(&item.name, &claims)?,
            })
        })
        .collect()
}

fn even_split(item: &str, amount: Decimal, recipients: usize) -> EngineResult<Decimal> {
    if recipients == 0 {
        return Err(EngineError::DegenerateAllocation {
            item: item.to_string(),
        });
    }
    Ok(amount / Decimal::from(recipients))
}
