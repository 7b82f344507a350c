use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::commit::RetryPolicy;
use crate::fee::FeeSchedule;
use crate::gateway::RoutingConfig;
use crate::gateway::http::ProviderEndpoint;
use crate::tasks::DeliveryPolicy;
use crate::usecase::TransactionLimits;
use crate::worker::WorkerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub gateway: GatewayConfig,
    pub limits: TransactionLimits,
    pub worker: WorkerConfig,
    pub tasks: TaskConfig,
    pub fee_schedules: Vec<FeeSchedule>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub use_json: bool,
    /// hourly | daily | never
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "./logs".to_string(),
            file: "wallet_ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub postgres_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            postgres_url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Absent retries conflicts until the unit commits
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub commit_ack_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_backoff_ms: policy.base_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            commit_ack_attempts: policy.commit_ack_attempts,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            commit_ack_attempts: self.commit_ack_attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound on one provider call
    pub call_timeout_ms: u64,
    /// Treat a silent provider as failed after this long. Absent waits forever.
    pub callback_timeout_secs: Option<u64>,
    pub routing: RoutingConfig,
    pub providers: Vec<ProviderEndpoint>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 15_000,
            callback_timeout_secs: None,
            routing: RoutingConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TaskConfig {
    pub max_attempts: u32,
    pub redelivery_delay_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        let policy = DeliveryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            redelivery_delay_ms: policy.redelivery_delay.as_millis() as u64,
        }
    }
}

impl TaskConfig {
    pub fn policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.max_attempts,
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.kind == StoreKind::Postgres && self.store.postgres_url.is_none() {
            return Err(ConfigError::Invalid(
                "store.postgres_url is required for the postgres store".into(),
            ));
        }
        if self.tasks.max_attempts == 0 {
            return Err(ConfigError::Invalid("tasks.max_attempts must be at least 1".into()));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.gateway.callback_timeout(), None);
        assert_eq!(config.retry.policy().max_attempts, None);
        assert_eq!(config.limits.transfer_bank.min, 10_000);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
logging:
  level: debug
gateway:
  callback_timeout_secs: 900
  routing:
    direct_bank_codes: ["451"]
  providers:
    - code: xendit
      base_url: https://api.example.test/
worker:
  batch_size: 5
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.rotation, "daily");
        assert_eq!(config.gateway.callback_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.gateway.routing.direct_bank_codes, vec!["451".to_string()]);
        assert_eq!(config.gateway.routing.ewallet_sentinel_account, "8888888888");
        assert_eq!(config.gateway.providers.len(), 1);
        assert_eq!(config.gateway.providers[0].timeout_ms, 10_000);
        assert_eq!(config.worker.batch_size, 5);
        assert_eq!(config.worker.scan_interval_secs, 30);
        assert_eq!(config.worker.marker_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn test_postgres_requires_url() {
        let err = AppConfig::from_yaml("store:\n  kind: postgres\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_dev_profile_loads() {
        let config = AppConfig::load("dev").unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.gateway.providers.len(), 3);
        assert_eq!(config.fee_schedules.len(), 1);
        let schedule = &config.fee_schedules[0];
        assert_eq!(
            schedule.rule_for(
                crate::transaction::TransactionType::AcceptCard,
                crate::actor::ActorKind::Corporate
            ),
            Some(&crate::fee::FeeRule::Percentage("0.025".into()))
        );
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("config/does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = AppConfig::from_yaml("retry: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
