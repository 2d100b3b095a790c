//! # relay-store
//!
//! Durable mirror of connection records and delivered messages, backed by `SQLite`.
//!
//! - **[`sqlite`]**: connection pool, embedded migrations, row types, and
//!   stateless repositories
//! - **[`SqliteRecordStore`]**: the [`relay_core::RecordStore`] implementation,
//!   running every repository call on tokio's blocking pool

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
mod store;

pub use errors::{DbError, Result};
pub use store::SqliteRecordStore;
