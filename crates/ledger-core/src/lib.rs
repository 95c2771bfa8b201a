//! # ledger-core
//!
//! why: describe a per-account append-only transaction log independently of any storage backend
//! relations: used by ledger-storage for backend implementations, ledger-commit for the engine
//! what: entry cursors, segment chains, stream paths, configuration, errors, collaborator traits

pub mod chain;
pub mod config;
pub mod coordination;
pub mod entry;
pub mod error;
pub mod path;
pub mod storage;

pub use chain::SegmentChain;
pub use config::{DigestType, LedgerTimings, ReplicationConfig};
pub use coordination::{Coordination, LeaderLease, Stat};
pub use entry::{EntryId, EntryRef, SegmentId};
pub use error::{ConfigError, CoordinationError, LedgerError, LedgerFailure, StorageError};
pub use path::StreamPath;
pub use storage::{LogStorage, SegmentHandle, SegmentOptions};
