//! # crmflow-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the storage port traits defined in `crmflow-app::ports`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `crmflow-app` (for port traits) and `crmflow-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod codec;

pub mod automation_repo;
pub mod enrollment_repo;
pub mod entity_store;
pub mod error;
pub mod log_repo;
pub mod pool;

pub use automation_repo::SqliteAutomationRepository;
pub use enrollment_repo::SqliteEnrollmentRepository;
pub use entity_store::SqliteEntityStore;
pub use log_repo::SqliteAutomationLogRepository;
pub use pool::{Config, Database};
