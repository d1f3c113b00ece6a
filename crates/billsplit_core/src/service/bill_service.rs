//! Bill settlement use-case service.
//!
//! # Responsibility
//! - Validate member input before anything is persisted.
//! - Run share normalization, cost allocation and aggregation for views.
//! - Drive status recomputation and finalization through the repository.
//!
//! # Invariants
//! - Settled bills reject every share, member and lock mutation.
//! - A share edit that would make any item's normalization degenerate is
//!   rejected before persistence.
//! - Views of settled bills read frozen costs instead of recomputing them.
//! - Manager partitions are stored as submitted; zero is a real share there.
//! - Finalization computes and persists costs inside one repository
//!   transaction.

use crate::engine::aggregator::{self, BillTotalsView, UserBillLine, UserBillView};
use crate::engine::ledger::{self, LedgerView, Settlement};
use crate::engine::normalizer::{check_partition, normalize_bill_with, ItemShares};
use crate::engine::status::{refresh_statuses, BillListing};
use crate::engine::{allocator, EngineError};
use crate::model::bill::{validate_username, Bill, BillValidationError, Item};
use crate::model::share::{NormalizedShare, ShareAssignment, ShareMode, UserItemCost};
use crate::repo::bill_repo::{
    BillEdit, BillListQuery, BillRepository, MemberBillRecord, RepoError,
};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Group whose members see bills of every group.
pub const ADMIN_GROUP: &str = "admin";

/// Service error for bill use-cases.
#[derive(Debug)]
pub enum BillServiceError {
    Engine(EngineError),
    Validation(BillValidationError),
    BillNotFound(String),
    MemberNotFound { bill: String, username: String },
    /// Operation requires a settled bill.
    NotSettled(String),
    Repo(RepoError),
}

impl Display for BillServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::BillNotFound(name) => write!(f, "bill not found: `{name}`"),
            Self::MemberNotFound { bill, username } => {
                write!(f, "`{username}` is not a member of bill `{bill}`")
            }
            Self::NotSettled(name) => write!(f, "bill `{name}` is not settled yet"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BillServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Engine(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for BillServiceError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<BillValidationError> for BillServiceError {
    fn from(value: BillValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for BillServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::BillNotFound(name) => Self::BillNotFound(name),
            RepoError::MemberNotFound { bill, username } => Self::MemberNotFound { bill, username },
            RepoError::BillSettled(bill) => Self::Engine(EngineError::StaleMutation { bill }),
            RepoError::ItemNotFound { item, .. } => {
                Self::Engine(EngineError::UnknownItemReference { item })
            }
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, BillServiceError>;

/// Normalized share view of one bill, as rendered for bill managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillSharesView {
    pub items: Vec<ItemShares>,
    pub users: Vec<String>,
    pub group: String,
}

/// Manager edit submitted for one bill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBillRequest {
    /// Already normalized partitions; each listed item is costed from
    /// exactly these shares until a member edits a claim on it.
    pub items: Vec<ItemShares>,
    pub new_members: Vec<String>,
    pub removed_members: Vec<String>,
}

/// Use-case service over a bill repository.
pub struct BillService<R: BillRepository> {
    repo: R,
}

impl<R: BillRepository> BillService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates an open bill with its item catalog.
    pub fn create_bill(
        &mut self,
        name: impl Into<String>,
        group: impl Into<String>,
        items: Vec<Item>,
    ) -> ServiceResult<Bill> {
        let bill = Bill::new(name, group, items);
        bill.validate()?;
        self.repo.create_bill(&bill)?;
        info!(
            "event=bill_create module=service status=ok items={}",
            bill.items.len()
        );
        self.require_bill(&bill.name)
    }

    /// Names of unsettled bills visible to `group`.
    pub fn list_open_bills(&self, group: &str) -> ServiceResult<Vec<String>> {
        let query = BillListQuery {
            group: (group != ADMIN_GROUP).then(|| group.to_string()),
            include_settled: false,
        };
        Ok(self
            .repo
            .list_bills(&query)?
            .into_iter()
            .map(|bill| bill.name)
            .collect())
    }

    /// Blank share form for a bill: every item with zero cost and share.
    pub fn bill_catalog(&self, bill: &str) -> ServiceResult<Vec<UserBillLine>> {
        let bill = self.require_bill(bill)?;
        Ok(bill
            .items
            .into_iter()
            .map(|item| UserBillLine {
                name: item.name,
                cost: Decimal::ZERO,
                quantity: item.quantity,
                share: Decimal::ZERO,
                category: item.category,
            })
            .collect())
    }

    /// Attaches `username` to several bills in one batch.
    pub fn add_member_to_bills(&mut self, username: &str, bills: &[String]) -> ServiceResult<()> {
        validate_username(username)?;
        self.repo.attach_member(username, bills, false)?;
        info!(
            "event=member_attach module=service status=ok bills={}",
            bills.len()
        );
        Ok(())
    }

    /// Detaches `username` and their claims from several bills in one batch.
    pub fn remove_member_from_bills(
        &mut self,
        username: &str,
        bills: &[String],
    ) -> ServiceResult<()> {
        self.repo.detach_member(username, bills)?;
        info!(
            "event=member_detach module=service status=ok bills={}",
            bills.len()
        );
        Ok(())
    }

    /// Replaces a member's raw claims on one bill.
    ///
    /// A raw share of zero requests an automatic even split.
    ///
    /// # Errors
    /// - `EngineError::InvalidShareValue` for raw shares outside `[0, 1]`.
    /// - `EngineError::UnknownItemReference` for items missing from the bill.
    /// - `EngineError::DegenerateAllocation` when the resulting claims cannot
    ///   be normalized.
    /// - `EngineError::StaleMutation` when the bill is settled.
    pub fn update_member_shares(
        &mut self,
        bill: &str,
        username: &str,
        shares: &[(String, Decimal)],
    ) -> ServiceResult<()> {
        let bill = self.require_mutable_bill(bill)?;
        if bill.member(username).is_none() {
            return Err(BillServiceError::MemberNotFound {
                bill: bill.name,
                username: username.to_string(),
            });
        }

        let parsed = parse_claims(&bill, shares)?;
        let (current, others): (Vec<ShareAssignment>, Vec<ShareAssignment>) = self
            .repo
            .load_assignments(&bill.name)?
            .into_iter()
            .partition(|assignment| assignment.username == username);
        let touched: BTreeSet<&str> = current
            .iter()
            .map(|assignment| assignment.item.as_str())
            .chain(parsed.iter().map(|(item, _)| item.as_str()))
            .collect();
        let resolved: Vec<ItemShares> = self
            .repo
            .load_resolved_shares(&bill.name)?
            .into_iter()
            .filter(|item| {
                !touched.contains(item.name.as_str())
                    && !item.users.iter().any(|user| user.username == username)
            })
            .collect();

        let mut preview = others;
        preview.extend(
            parsed
                .iter()
                .map(|(item, mode)| ShareAssignment::new(username, item.as_str(), *mode)),
        );
        normalize_bill_with(&bill.items, &preview, &resolved)?;

        self.repo
            .replace_member_shares(&bill.name, username, &parsed)?;
        debug!(
            "event=shares_update module=service status=ok items={}",
            parsed.len()
        );
        Ok(())
    }

    /// Marks a member as done editing their shares.
    pub fn lock_member(&mut self, bill: &str, username: &str) -> ServiceResult<()> {
        self.repo
            .set_locked(bill, &[username.to_string()], true)?;
        Ok(())
    }

    /// Reopens share editing for several members of one bill.
    pub fn unlock_members(&mut self, bill: &str, usernames: &[String]) -> ServiceResult<()> {
        self.repo.set_locked(bill, usernames, false)?;
        Ok(())
    }

    /// Lists every bill with its recomputed status and member count.
    ///
    /// # Side effects
    /// - Stored statuses that drifted from member lock flags are rewritten in
    ///   one batch; settled bills are never rewritten.
    pub fn list_bills(&mut self) -> ServiceResult<Vec<BillListing>> {
        let bills = self.repo.list_bills(&BillListQuery {
            group: None,
            include_settled: true,
        })?;
        let refresh = refresh_statuses(&bills);
        if !refresh.updates.is_empty() {
            let written = self.repo.write_statuses(&refresh.updates)?;
            info!(
                "event=status_refresh module=service status=ok bills={} updated={}",
                bills.len(),
                written
            );
        }
        Ok(refresh.listings)
    }

    /// Normalized shares of every item, members and group of one bill.
    pub fn manage_bill(&self, bill: &str) -> ServiceResult<BillSharesView> {
        let bill = self.require_bill(bill)?;
        let items = if bill.is_settled() {
            shares_from_costs(&bill, &self.repo.load_settled_costs(&bill.name)?)
        } else {
            let assignments = self.repo.load_assignments(&bill.name)?;
            let manager = self.repo.load_resolved_shares(&bill.name)?;
            let resolved = normalize_bill_with(&bill.items, &assignments, &manager)?;
            for item in resolved.iter().filter(|item| !item.is_balanced()) {
                warn!(
                    "event=partition_drift module=service status=warn claimants={} slack={}",
                    item.users.len(),
                    item.partition_slack()
                );
            }
            resolved
        };

        Ok(BillSharesView {
            items,
            users: bill
                .members
                .iter()
                .map(|member| member.username.clone())
                .collect(),
            group: bill.group,
        })
    }

    /// Applies a manager edit as one batch.
    ///
    /// Each listed item's shares are stored verbatim as its resolved
    /// partition, so `manage_bill` shows them back unchanged and finalization
    /// costs them without normalizing again.
    ///
    /// # Errors
    /// - `MemberNotFound` when an item lists a user who is neither an
    ///   existing nor a new member, or is being removed.
    /// - `EngineError::UnknownItemReference` for items missing from the bill.
    /// - `EngineError::InvalidShareValue`, `DuplicateClaimant` or
    ///   `UnbalancedPartition` when a listed item is not a partition.
    /// - `EngineError::StaleMutation` when the bill is settled.
    pub fn save_bill(&mut self, bill: &str, request: &SaveBillRequest) -> ServiceResult<()> {
        let bill = self.require_mutable_bill(bill)?;

        let removed: BTreeSet<&str> = request
            .removed_members
            .iter()
            .map(String::as_str)
            .collect();
        for username in &request.new_members {
            validate_username(username)?;
        }

        for item in &request.items {
            if bill.item(&item.name).is_none() {
                return Err(EngineError::UnknownItemReference {
                    item: item.name.clone(),
                }
                .into());
            }
            for user in &item.users {
                let known = bill.member(&user.username).is_some()
                    || request.new_members.contains(&user.username);
                if !known || removed.contains(user.username.as_str()) {
                    return Err(BillServiceError::MemberNotFound {
                        bill: bill.name.clone(),
                        username: user.username.clone(),
                    });
                }
            }
            check_partition(item)?;
        }

        let edit = BillEdit {
            resolved_items: request.items.clone(),
            new_members: request.new_members.clone(),
            removed_members: request.removed_members.clone(),
        };
        self.repo.apply_edit(&bill.name, &edit)?;
        info!(
            "event=bill_save module=service status=ok items_resolved={} members_added={} members_removed={}",
            edit.resolved_items.len(),
            edit.new_members.len(),
            edit.removed_members.len()
        );
        Ok(())
    }

    /// Bills `username` participates in, in join order.
    pub fn member_bills(&self, username: &str) -> ServiceResult<Vec<MemberBillRecord>> {
        Ok(self.repo.list_member_bills(username)?)
    }

    /// One member's items, costs and total on a bill.
    pub fn member_bill(&self, bill: &str, username: &str) -> ServiceResult<UserBillView> {
        let bill = self.require_bill(bill)?;
        let costs = self.item_costs(&bill)?;
        aggregator::user_bill_view(&bill, username, &costs).ok_or_else(|| {
            BillServiceError::MemberNotFound {
                bill: bill.name.clone(),
                username: username.to_string(),
            }
        })
    }

    /// Totals of every member of a bill.
    pub fn bill_totals(&self, bill: &str) -> ServiceResult<BillTotalsView> {
        let bill = self.require_bill(bill)?;
        let costs = self.item_costs(&bill)?;
        Ok(aggregator::bill_totals(&bill, &costs))
    }

    /// Freezes a bill: persists normalized shares, costs and member amounts
    /// and marks it settled.
    ///
    /// # Errors
    /// - `EngineError::StaleMutation` when the bill is already settled.
    pub fn finalize_bill(&mut self, bill: &str) -> ServiceResult<Settlement> {
        let started_at = Instant::now();
        info!("event=bill_finalize module=service status=start");

        let result = self.finalize_inner(bill);
        match &result {
            Ok(settlement) => info!(
                "event=bill_finalize module=service status=ok members={} duration_ms={}",
                settlement.amounts.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=bill_finalize module=service status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    /// Sets the paid flag of a member on a settled bill.
    pub fn mark_paid(&mut self, bill: &str, username: &str, paid: bool) -> ServiceResult<()> {
        let bill = self.require_bill(bill)?;
        if !bill.is_settled() {
            return Err(BillServiceError::NotSettled(bill.name));
        }
        self.repo.set_paid(&bill.name, username, paid)?;
        Ok(())
    }

    /// Outstanding settled amounts of every member, grouped per user.
    pub fn ledger(&self) -> ServiceResult<Vec<LedgerView>> {
        let records = self.repo.list_ledger_records()?;
        Ok(ledger::collect_debts(&records))
    }

    fn finalize_inner(&mut self, bill: &str) -> ServiceResult<Settlement> {
        self.repo.finalize_with(
            bill,
            |bill, assignments, manager| -> ServiceResult<Settlement> {
                let costs = compute_costs(bill, assignments, manager)?;
                Ok(ledger::settle(bill, costs)?)
            },
        )
    }

    fn item_costs(&self, bill: &Bill) -> ServiceResult<Vec<UserItemCost>> {
        if bill.is_settled() {
            return Ok(self.repo.load_settled_costs(&bill.name)?);
        }
        let assignments = self.repo.load_assignments(&bill.name)?;
        let manager = self.repo.load_resolved_shares(&bill.name)?;
        compute_costs(bill, &assignments, &manager)
    }

    fn require_bill(&self, name: &str) -> ServiceResult<Bill> {
        self.repo
            .get_bill(name)?
            .ok_or_else(|| BillServiceError::BillNotFound(name.to_string()))
    }

    fn require_mutable_bill(&self, name: &str) -> ServiceResult<Bill> {
        let bill = self.require_bill(name)?;
        if bill.is_settled() {
            return Err(EngineError::StaleMutation { bill: bill.name }.into());
        }
        Ok(bill)
    }
}

fn parse_claims(
    bill: &Bill,
    shares: &[(String, Decimal)],
) -> ServiceResult<Vec<(String, ShareMode)>> {
    shares
        .iter()
        .map(|(item, raw)| -> ServiceResult<(String, ShareMode)> {
            let mode = ShareMode::from_raw(*raw)?;
            if bill.item(item).is_none() {
                return Err(EngineError::UnknownItemReference { item: item.clone() }.into());
            }
            Ok((item.clone(), mode))
        })
        .collect()
}

fn compute_costs(
    bill: &Bill,
    assignments: &[ShareAssignment],
    manager: &[ItemShares],
) -> ServiceResult<Vec<UserItemCost>> {
    let resolved = normalize_bill_with(&bill.items, assignments, manager)?;
    Ok(allocator::allocate_bill(&bill.items, &resolved)?)
}

fn shares_from_costs(bill: &Bill, costs: &[UserItemCost]) -> Vec<ItemShares> {
    bill.items
        .iter()
        .map(|item| ItemShares {
            name: item.name.clone(),
            users: costs
                .iter()
                .filter(|cost| cost.item == item.name)
                .map(|cost| NormalizedShare {
                    username: cost.username.clone(),
                    share: cost.share,
                })
                .collect(),
        })
        .collect()
}
