//! # relay-server
//!
//! Network front of Relay:
//!
//! - **WebSocket gateway**: `/ws` upgrade, one channel-backed transport per socket,
//!   inbound subscribe/unsubscribe/ping/pong commands
//! - **HTTP API**: event and notification ingestion, per-tenant connection listing
//! - **Operational endpoints**: `/health` and Prometheus `/metrics`

#![deny(unsafe_code)]

pub mod api;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod websocket;

pub use errors::ServerError;
pub use server::{AppState, RelayServer};
