//! Durable task event log and replay

pub mod persister;
pub mod replay;

pub use persister::{CRASH_RECOVERY_ERROR, LogRecord, PendingEntry, TaskPersister};
pub use replay::{fold, read_records, replay, terminal_state};
