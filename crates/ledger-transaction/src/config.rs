//! # config
//!
//! why: rendezvous timeouts and pool sizing are operational knobs, not constants
//! relations: consumed by log.rs and coordinator.rs, aggregates ledger-core's configuration
//! what: TransactionLogConfig, CoordinatorConfig, LedgerServiceConfig (json string or file)

use ledger_core::{ConfigError, LedgerTimings, ReplicationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bounded waits of the submit/commit rendezvous
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionLogConfig {
    /// How long a submitter waits for a committer to take its transaction (ms)
    pub submit_timeout_ms: u64,
    /// How long a submitter waits for the taken transaction to be committed (ms)
    pub commit_timeout_ms: u64,
    /// How long a committer waits for a submission per attempt (ms)
    pub await_timeout_ms: u64,
}

impl Default for TransactionLogConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 5000,
            commit_timeout_ms: 10000,
            await_timeout_ms: 1000,
        }
    }
}

impl TransactionLogConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("submit_timeout_ms", self.submit_timeout_ms)?;
        positive("commit_timeout_ms", self.commit_timeout_ms)?;
        positive("await_timeout_ms", self.await_timeout_ms)
    }
}

/// Per-account committer pools and history queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Committers competing for each account's leadership
    pub resilience_factor: usize,
    /// Upper bound on reconstructing history for an account with no pool (ms)
    pub list_timeout_ms: u64,
    /// Evict pools unused for this long (ms), never when `None`
    pub idle_timeout_ms: Option<u64>,
    pub sweep_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resilience_factor: 3,
            list_timeout_ms: 20000,
            idle_timeout_ms: Some(900_000),
            sweep_interval_ms: 30000,
        }
    }
}

impl CoordinatorConfig {
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resilience_factor < 1 {
            return Err(ConfigError::Invalid {
                field: "resilience_factor",
                reason: "must be greater than 0".to_string(),
            });
        }
        positive("list_timeout_ms", self.list_timeout_ms)?;
        positive("sweep_interval_ms", self.sweep_interval_ms)?;
        if let Some(idle) = self.idle_timeout_ms {
            positive("idle_timeout_ms", idle)?;
        }
        Ok(())
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerServiceConfig {
    pub replication: ReplicationConfig,
    pub timings: LedgerTimings,
    pub transaction_log: TransactionLogConfig,
    pub coordinator: CoordinatorConfig,
}

impl LedgerServiceConfig {
    /// Parse and validate; absent sections and fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.replication.validate()?;
        self.timings.validate()?;
        self.transaction_log.validate()?;
        self.coordinator.validate()
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_rendezvous_contract() {
        let config = LedgerServiceConfig::default();
        assert_eq!(config.transaction_log.submit_timeout(), Duration::from_secs(5));
        assert_eq!(config.transaction_log.commit_timeout(), Duration::from_secs(10));
        assert_eq!(config.transaction_log.await_timeout(), Duration::from_secs(1));
        assert_eq!(config.coordinator.resilience_factor, 3);
        assert_eq!(config.coordinator.list_timeout(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = LedgerServiceConfig::from_json(
            r#"{"coordinator": {"resilience_factor": 5, "idle_timeout_ms": null}}"#,
        )
        .unwrap();

        assert_eq!(config.coordinator.resilience_factor, 5);
        assert_eq!(config.coordinator.idle_timeout(), None);
        assert_eq!(config.coordinator.list_timeout_ms, 20000);
        assert_eq!(config.replication, ReplicationConfig::default());
    }

    #[test]
    fn zero_resilience_is_rejected() {
        let result = LedgerServiceConfig::from_json(r#"{"coordinator": {"resilience_factor": 0}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "resilience_factor",
                ..
            })
        ));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = TransactionLogConfig {
            commit_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            LedgerServiceConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timings": {{"poll_interval_ms": 250}}}}"#).unwrap();

        let config = LedgerServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.timings.poll_interval_ms, 250);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LedgerServiceConfig::load(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
