//! Asynchronous snapshot persistence

pub mod scheduler;

pub use scheduler::{FlushSummary, LoadSummary, PersistenceScheduler};
