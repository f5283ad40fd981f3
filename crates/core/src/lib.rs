//! Pure domain logic for the waybill notification subsystem.
//!
//! Nothing in this crate performs I/O. It is shared by the repository layer,
//! the notification services and the HTTP/WebSocket server.

pub mod audit_changes;
pub mod batch_summary;
pub mod error;
pub mod jobs;
pub mod notification;
pub mod permissions;
pub mod preference;
pub mod rooms;
pub mod types;
