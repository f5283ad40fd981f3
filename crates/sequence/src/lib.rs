//! Formatted identifier generation (shipment pro numbers and friends).
//!
//! [`store`] allocates monotonic counters per (type, org, bu, year, month),
//! [`format`] turns a counter value into the tenant's identifier layout and
//! back, and [`generator::SequenceGenerator`] ties the two together behind a
//! format cache.

pub mod error;
pub mod format;
pub mod generator;
pub mod provider;
pub mod store;

pub use error::SequenceError;
pub use format::{ParsedSequence, SequenceFormat};
pub use generator::{GenerateRequest, SequenceGenerator};
pub use provider::{DefaultFormatProvider, FormatProvider, PgFormatProvider, SequenceType};
pub use store::{MemorySequenceStore, PgSequenceStore, RetryPolicy, SequenceStore};
