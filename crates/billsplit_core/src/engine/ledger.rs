//! Finalization totals and the cross-bill debt ledger.
//!
//! # Responsibility
//! - Turn a bill's item costs into the per-member amounts persisted at
//!   finalization.
//! - Filter settled, unpaid, non-zero member balances into ledger views.
//!
//! # Invariants
//! - Finalizing an already settled bill is a `StaleMutation`.
//! - Every member gets an amount, zero when they claimed nothing.

use crate::engine::aggregator::totals_by_member;
use crate::engine::{EngineError, EngineResult};
use crate::model::bill::{Bill, BillStatus};
use crate::model::share::UserItemCost;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of finalizing one bill, applied atomically by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub bill: String,
    /// Member totals keyed by username.
    pub amounts: BTreeMap<String, Decimal>,
    /// Frozen normalized shares and costs.
    pub costs: Vec<UserItemCost>,
}

/// One member balance on one bill, as read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub username: String,
    pub bill: String,
    pub status: BillStatus,
    pub amount: Decimal,
    pub paid: bool,
}

/// One outstanding bill inside a ledger view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub name: String,
    pub amount: Decimal,
    pub paid: bool,
}

/// A user's outstanding settled amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerView {
    pub username: String,
    pub bills: Vec<LedgerEntry>,
}

/// Computes the settlement of `bill` from its item costs.
///
/// # Errors
/// - `EngineError::StaleMutation` when `bill` is already settled.
pub fn settle(bill: &Bill, costs: Vec<UserItemCost>) -> EngineResult<Settlement> {
    if bill.is_settled() {
        return Err(EngineError::StaleMutation {
            bill: bill.name.clone(),
        });
    }

    let mut amounts = totals_by_member(&costs);
    for member in &bill.members {
        amounts
            .entry(member.username.clone())
            .or_insert(Decimal::ZERO);
    }

    Ok(Settlement {
        bill: bill.name.clone(),
        amounts,
        costs,
    })
}

/// Groups outstanding balances per user.
///
/// Every user seen in `records` is listed, sorted by username; `bills` keeps
/// only settled, unpaid, non-zero balances in record order.
pub fn collect_debts(records: &[LedgerRecord]) -> Vec<LedgerView> {
    let mut grouped: BTreeMap<&str, Vec<LedgerEntry>> = BTreeMap::new();
    for record in records {
        let entries = grouped.entry(record.username.as_str()).or_default();
        if record.status.is_terminal() && !record.paid && !record.amount.is_zero() {
            entries.push(LedgerEntry {
                name: record.bill.clone(),
                amount: record.amount,
                paid: record.paid,
            });
        }
    }

    grouped
        .into_iter()
        .map(|(username, bills)| LedgerView {
            username: username.to_string(),
            bills,
        })
        .collect()
}
