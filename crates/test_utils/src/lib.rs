//! Test utilities crate
//!
//! Shared infrastructure for the reconciliation test suite:
//!
//! - `fixtures`: pre-built dates, amounts, and ranges
//! - `builders`: builder patterns for test data construction
//! - `memory`: in-memory fakes for the reconciliation ports

pub mod builders;
pub mod fixtures;
pub mod memory;

pub use builders::*;
pub use fixtures::*;
pub use memory::*;
