//! `SQLite` backend.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and performance pragmas applied
//!   to every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time and run
//!   transactionally.
//! - **[`row_types`]**: raw row structs and their conversion into domain records.
//! - **[`repositories`]**: stateless repository structs; every method takes
//!   `&Connection`.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
