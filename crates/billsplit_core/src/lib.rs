//! Share-normalization and settlement engine for shared bills.
//! This crate is the single source of truth for settlement invariants.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::CoreConfig;
pub use engine::aggregator::{BillTotalsView, MemberTotal, UserBillLine, UserBillView};
pub use engine::ledger::{LedgerEntry, LedgerRecord, LedgerView, Settlement};
pub use engine::normalizer::{
    check_partition, normalize_bill, normalize_bill_with, normalize_item, Claim, ItemShares,
};
pub use engine::status::{BillListing, StatusRefresh, StatusUpdate};
pub use engine::{round_money, EngineError, EngineResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::bill::{Bill, BillId, BillStatus, BillValidationError, Item, Member};
pub use model::share::{NormalizedShare, ShareAssignment, ShareMode, UserItemCost};
pub use repo::bill_repo::{
    BillEdit, BillListQuery, BillRepository, MemberBillRecord, RepoError, RepoResult,
    SqliteBillRepository,
};
pub use service::bill_service::{
    BillService, BillServiceError, BillSharesView, SaveBillRequest, ServiceResult, ADMIN_GROUP,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
