//! Concrete storage implementations with encryption at rest.
//! Uses AES-256-GCM records persisted in a single-table SQLite database.

pub mod cipher;
pub mod sealed_store;
pub mod sqlite_store;
