//! Persistence facade: store traits plus their Postgres and in-memory
//! implementations. Schema management (migrations/DDL) is owned by the
//! deployment; the expected tables are documented on each Postgres impl.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
mod traits;

pub use traits::{
    AlertStore, AlertUpsert, DeadLetterEntry, DeadLetterPage, DeadLetterStore,
    FireType, SilenceStats, SilenceStore, TimerRecord, TimerStore,
};
