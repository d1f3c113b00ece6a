//! Storage collaborator contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the bill persistence interface the services are written against.
//! - Keep SQL details behind that interface.
//!
//! # Invariants
//! - Every per-bill mutation runs in one `IMMEDIATE` transaction that first
//!   rejects settled bills.
//! - All SQL is parameterized; no value is concatenated into statements.

pub mod bill_repo;
