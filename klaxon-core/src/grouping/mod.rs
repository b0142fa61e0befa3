//! Group aggregation: key derivation, the sharded group table, and the
//! timer manager that persists every scheduled flush so a crashed process
//! recovers its pending work.

pub mod key;
mod manager;
mod timer;

pub use manager::{FlushReason, GroupFlush, GroupInsert, GroupManager, GroupState};
pub use timer::{RestoreReport, TimerFire, TimerManager};
