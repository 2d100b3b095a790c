//! # relay-hub
//!
//! The in-memory heart of Relay:
//!
//! - **Registry**: live connections indexed by ID and tenant, with per-tenant admission control
//! - **Matcher**: pure subscription-vs-event predicate and tenant-scoped fan-out selection
//! - **Dispatcher**: per-connection send, filtered broadcast, and tenant-wide notify
//! - **Health**: one scheduler task driving ping/pong probing and timeouts
//! - **Sweeper**: batched, cancellable retention sweeps over the record store
//! - **Hub**: composition root with explicit `start` / `shutdown`

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod health;
pub mod hub;
pub mod matcher;
pub mod metrics;
pub mod registry;
pub mod shutdown;
pub mod sweeper;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use connection::LiveConnection;
pub use dispatcher::Dispatcher;
pub use errors::RegistryError;
pub use health::HealthMonitor;
pub use hub::Hub;
pub use matcher::Rejection;
pub use registry::{Registry, RegistryConfig};
pub use shutdown::ShutdownCoordinator;
pub use sweeper::{SweepReport, Sweeper};
pub use transport::{ChannelTransport, Transport, TransportError};
