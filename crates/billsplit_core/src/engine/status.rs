//! Bill lifecycle classification from member lock flags.
//!
//! # Invariants
//! - `Open` iff no members; `Ready` iff every member locked; else `Pending`.
//! - A stored `Settled` status is never recomputed or overwritten.
//! - Recomputation is idempotent and safe to run redundantly.

use crate::model::bill::{Bill, BillStatus};
use serde::{Deserialize, Serialize};

/// Row of the bill listing view. `members` is the member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillListing {
    pub name: String,
    pub status: BillStatus,
    pub members: usize,
}

/// Stored status change produced by a recomputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub bill: String,
    pub status: BillStatus,
}

/// Listing rows plus the status writes they require.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRefresh {
    pub listings: Vec<BillListing>,
    pub updates: Vec<StatusUpdate>,
}

/// Derives the lock-based status from member lock flags.
pub fn derive_status<I>(locks: I) -> BillStatus
where
    I: IntoIterator<Item = bool>,
{
    let mut members = 0usize;
    let mut all_locked = true;
    for locked in locks {
        members += 1;
        all_locked &= locked;
    }

    match (members, all_locked) {
        (0, _) => BillStatus::Open,
        (_, true) => BillStatus::Ready,
        (_, false) => BillStatus::Pending,
    }
}

/// Returns the status to store, or `None` when nothing must change.
pub fn reconcile_status(stored: BillStatus, derived: BillStatus) -> Option<BillStatus> {
    if stored.is_terminal() || stored == derived {
        None
    } else {
        Some(derived)
    }
}

/// Recomputes statuses for a set of bills.
///
/// Listing rows carry the reconciled status; `updates` holds only bills
/// whose stored status differs and is not settled.
pub fn refresh_statuses(bills: &[Bill]) -> StatusRefresh {
    let mut refresh = StatusRefresh::default();
    for bill in bills {
        let derived = derive_status(bill.members.iter().map(|member| member.locked));
        let status = match reconcile_status(bill.status, derived) {
            Some(next) => {
                refresh.updates.push(StatusUpdate {
                    bill: bill.name.clone(),
                    status: next,
                });
                next
            }
            None => bill.status,
        };
        refresh.listings.push(BillListing {
            name: bill.name.clone(),
            status,
            members: bill.members.len(),
        });
    }
    refresh
}
