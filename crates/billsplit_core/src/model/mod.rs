//! Domain model for shared bills, their items, members and shares.
//!
//! # Responsibility
//! - Define the canonical data structures consumed by the settlement engine.
//! - Keep the "split evenly" share sentinel as an explicit variant.
//!
//! # Invariants
//! - Item names are unique within one bill.
//! - A bill in `BillStatus::Settled` never changes status again.
//! - `Member::amount` stays zero until the bill is finalized.

pub mod bill;
pub mod share;
