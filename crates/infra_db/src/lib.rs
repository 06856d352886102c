//! PostgreSQL infrastructure for the reconciliation core
//!
//! Implements the `ReconciliationStore` port on SQLx. Every state
//! transition runs inside a single SQL transaction with a compare-and-set
//! on the transaction's status, so concurrent operators cannot apply a
//! transition twice.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool_from_url, run_migrations, PgReconciliationStore};
//!
//! let pool = create_pool_from_url("postgres://localhost/reconciliation").await?;
//! run_migrations(&pool).await?;
//! let store = PgReconciliationStore::new(pool);
//! ```

pub mod error;
pub mod pool;
pub mod store;

pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use store::PgReconciliationStore;
