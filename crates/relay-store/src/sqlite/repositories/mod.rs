//! Stateless repositories.
//!
//! Each method takes a `&Connection` and runs SQL, so every operation is a
//! plain function of (connection, input) and can be tested on its own.
//! Repositories store timestamps verbatim; stamping server time is the
//! caller's job.

pub mod connection;
pub mod message_log;

pub use connection::ConnectionRepo;
pub use message_log::MessageLogRepo;

/// Clamp a `usize` limit into an SQL `LIMIT` parameter.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
