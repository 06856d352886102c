//! Core Kernel - Foundational types for the reconciliation system
//!
//! This crate provides the building blocks shared by all domain modules:
//! - Money types with precise decimal arithmetic
//! - Date ranges for statement windows
//! - Strongly-typed identifiers

pub mod error;
pub mod identifiers;
pub mod money;
pub mod temporal;

pub use error::CoreError;
pub use identifiers::{AccountId, AllocationId, CostCenterId, LedgerRecordId, TransactionId};
pub use money::{Currency, Money, MoneyError};
pub use temporal::{DateRange, TemporalError};
