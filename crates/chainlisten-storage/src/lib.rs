//! chainlisten-storage — idempotency/checkpoint store backends.
//!
//! Backends:
//! - [`memory`]: in-memory (default; state is lost on exit)
//! - [`sqlite`]: SQLite via `sqlx` (single-file persistence, feature `sqlite`)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
