//! WebSocket gateway: upgrade handling, per-socket sessions, client commands.

pub mod command;
pub mod session;

pub use command::{ClientCommand, CommandReply};
pub use session::ConnectParams;
