//! Storage implementations for leads and run history.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//! - `SqliteStore` - SQLite file-based storage (requires `sqlite` feature)

pub mod locks;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use locks::KeyLocks;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
