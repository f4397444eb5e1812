//! Transactional persistence gateway for iron-cadence.
//!
//! This crate provides:
//!
//! - **Gateway traits**: [`JobStore`] / [`JobStoreTx`] with read-your-writes
//!   transactional semantics
//! - **Transaction boundary**: [`TransactionService`] with rollback-only
//!   flags and after-commit hooks (transactional outbox)
//! - **Stores**: an in-memory reference implementation and a PostgreSQL
//!   implementation over sqlx

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod transaction;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use repository::{FailedJob, JobStore, JobStoreTx, QueryOptions, SortOrder};
pub use transaction::{Transaction, TransactionService};
