//! Bill use-case services.
//!
//! # Responsibility
//! - Orchestrate repository reads, engine computations and batch writes.
//! - Keep callers decoupled from storage details.

pub mod bill_service;
