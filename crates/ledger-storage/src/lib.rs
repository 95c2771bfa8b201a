//! # ledger-storage
//!
//! why: run and test the commit engine without an external storage or coordination cluster
//! relations: implements the ledger-core LogStorage and Coordination traits
//! what: InMemoryLogStorage, FileLogStorage (durable, single node), InMemoryCoordination

mod coordination;
mod file;
mod memory;

pub use coordination::InMemoryCoordination;
pub use file::FileLogStorage;
pub use memory::InMemoryLogStorage;
