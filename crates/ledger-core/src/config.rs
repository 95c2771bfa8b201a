//! # config
//!
//! why: replication policy and polling cadence are stream-wide settings
//! relations: consumed by ledger-commit's SegmentAccessor and LogReader
//! what: DigestType, ReplicationConfig, LedgerTimings with defaults and validation

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Checksum scheme used for segment entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
    #[default]
    Mac,
    Crc32,
    Dummy,
}

/// Replication policy applied to every segment a leader creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Number of storage nodes a segment is striped across
    pub ensemble_size: u32,
    /// Number of copies written for each entry
    pub write_quorum_size: u32,
    /// Number of acknowledgements required before an append is confirmed
    pub ack_quorum_size: u32,
    pub digest: DigestType,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 3,
            write_quorum_size: 2,
            ack_quorum_size: 2,
            digest: DigestType::Mac,
        }
    }
}

impl ReplicationConfig {
    /// Check `ensemble >= write quorum >= ack quorum >= 1`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_quorum_size < 1 {
            return Err(ConfigError::Invalid {
                field: "ack_quorum_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.write_quorum_size < self.ack_quorum_size {
            return Err(ConfigError::Invalid {
                field: "write_quorum_size",
                reason: format!(
                    "{} is smaller than ack quorum {}",
                    self.write_quorum_size, self.ack_quorum_size
                ),
            });
        }
        if self.ensemble_size < self.write_quorum_size {
            return Err(ConfigError::Invalid {
                field: "ensemble_size",
                reason: format!(
                    "{} is smaller than write quorum {}",
                    self.ensemble_size, self.write_quorum_size
                ),
            });
        }
        Ok(())
    }
}

/// Polling cadence of readers and committers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerTimings {
    /// Wait between re-checks of an open segment and between run loop passes (ms)
    pub poll_interval_ms: u64,
}

impl Default for LedgerTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl LedgerTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
