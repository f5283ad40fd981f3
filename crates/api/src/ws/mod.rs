//! WebSocket infrastructure for real-time delivery.
//!
//! Provides the hub (indexes, fan-out, cross-node relay), the
//! per-connection pumps, heartbeat, and the HTTP upgrade handler.

mod client;
mod handler;
mod heartbeat;
pub mod hub;
pub mod message;

pub(crate) use handler::may_join;
pub use handler::ws_handler;
pub use heartbeat::{start_heartbeat, HEARTBEAT_INTERVAL};
pub use hub::{Client, Hub};
