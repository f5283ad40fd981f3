//! Zero-sized repository structs, one per table group.
//!
//! Every method takes a `&PgPool` and returns [`crate::DbError`].

pub mod audit_repo;
pub mod notification_preference_repo;
pub mod notification_repo;
pub mod sequence_repo;
pub mod user_repo;

pub use audit_repo::AuditRepo;
pub use notification_preference_repo::NotificationPreferenceRepo;
pub use notification_repo::NotificationRepo;
pub use sequence_repo::{SequenceFormatRepo, SequenceRepo};
pub use user_repo::UserRepo;
