// # Back-office Store Implementations
//
// The SQLite implementation lives in its own crate (`reseller-store-sqlite`)
// so the core stays free of database drivers.

pub mod memory;

pub use memory::{MemoryStore, MemoryTx};
