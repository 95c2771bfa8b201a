//! # ledger-commit
//!
//! why: totally order entries of a stream through a single elected writer while followers stay warm
//! relations: built on ledger-core traits, specialised for transactions by ledger-transaction
//! what: segment accessor, chain store, leadership flag, generic reader (follow/replay) and committer

pub mod accessor;
pub mod chain_store;
pub mod codec;
pub mod committer;
pub mod context;
pub mod leadership;
pub mod reader;

pub use accessor::{Segment, SegmentAccessor};
pub use chain_store::{ChainStore, VersionedChain};
pub use codec::{JsonCodec, PayloadCodec};
pub use committer::{CommitAttempt, LogCommitter};
pub use leadership::LeadershipFlag;
pub use reader::{EntryConsumer, LogReader};
