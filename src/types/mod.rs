//! Core domain types for the sync engine.

mod ids;
mod record;

pub use ids::{EntityId, SecurityKey, Timestamp};
pub use record::{Record, RecordError, Stream};
