//! Store implementations.

mod row;

pub mod memory_store;
pub mod sqlite_store;

pub use self::memory_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
