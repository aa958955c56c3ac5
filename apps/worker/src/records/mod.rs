// Versioned record repository: live rows mutated in place, every prior state kept as an
// immutable snapshot row. Backends plug in through `RecordBackend`.

pub mod backend;
pub mod diff;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use backend::RecordBackend;
pub use model::{Entity, VersionedRecord};
pub use postgres::PgRecordBackend;
pub use store::{RecordStore, UpdateOutcome};
