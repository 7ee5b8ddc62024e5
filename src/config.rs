//! Operator configuration read from the process environment
//!
//! All settings have defaults so the operator starts without any configuration;
//! invalid values are rejected at startup instead of being replaced silently.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::retry::{LinearBackoff, RetryConfig};

pub const ENV_POD_NAME: &str = "POD_NAME";
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";
pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";
pub const ENV_RESYNC_SECS: &str = "DOGU_OPERATOR_RESYNC_SECS";
pub const ENV_RECONCILE_TIMEOUT_SECS: &str = "DOGU_OPERATOR_RECONCILE_TIMEOUT_SECS";
pub const ENV_EXEC_POD_ATTEMPTS: &str = "DOGU_OPERATOR_EXEC_POD_ATTEMPTS";
pub const ENV_EXEC_POD_BACKOFF_MS: &str = "DOGU_OPERATOR_EXEC_POD_BACKOFF_MS";
pub const ENV_CONFLICT_RETRIES: &str = "DOGU_OPERATOR_CONFLICT_RETRIES";
pub const ENV_DEFAULT_VOLUME_SIZE: &str = "DOGU_OPERATOR_DEFAULT_VOLUME_SIZE";
pub const ENV_HEALTH_PORT: &str = "DOGU_OPERATOR_HEALTH_PORT";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings of the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Identity used for leader election
    pub pod_name: String,
    /// Namespace the dogus live in
    pub namespace: String,
    /// Requeue interval after a pass that made full progress
    pub resync_interval: Duration,
    /// Deadline of a single reconcile pass
    pub reconcile_timeout: Duration,
    /// Polling of exec pods and pod readiness gates
    pub exec_pod_wait: LinearBackoff,
    /// Retries of finalizer and status writes on version conflicts
    pub conflict_retry: RetryConfig,
    /// Size of a newly created data volume when the dogu declares no larger minimum
    pub default_volume_size: String,
    /// Port of the health and metrics server
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: "dogu-operator".to_string(),
            namespace: "default".to_string(),
            resync_interval: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(600),
            exec_pod_wait: LinearBackoff::default(),
            conflict_retry: RetryConfig::with_max_attempts(5),
            default_volume_size: "2Gi".to_string(),
            health_port: 8080,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pod_name = lookup(ENV_POD_NAME).unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or(defaults.pod_name)
        });
        let namespace = lookup(ENV_WATCH_NAMESPACE)
            .or_else(|| lookup(ENV_POD_NAMESPACE))
            .unwrap_or(defaults.namespace);

        let resync_secs: u64 = parse_or(&lookup, ENV_RESYNC_SECS, 300)?;
        let timeout_secs: u64 = parse_or(&lookup, ENV_RECONCILE_TIMEOUT_SECS, 600)?;
        let exec_attempts: u32 = parse_or(
            &lookup,
            ENV_EXEC_POD_ATTEMPTS,
            defaults.exec_pod_wait.max_attempts,
        )?;
        let exec_backoff_ms: u64 = parse_or(
            &lookup,
            ENV_EXEC_POD_BACKOFF_MS,
            defaults.exec_pod_wait.step.as_millis() as u64,
        )?;
        let conflict_retries: u32 = parse_or(
            &lookup,
            ENV_CONFLICT_RETRIES,
            defaults.conflict_retry.max_attempts,
        )?;
        let health_port: u16 = parse_or(&lookup, ENV_HEALTH_PORT, defaults.health_port)?;

        if exec_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_EXEC_POD_ATTEMPTS,
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if conflict_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_CONFLICT_RETRIES,
                value: "0".to_string(),
                reason: "retries must be bounded and at least one".to_string(),
            });
        }

        let default_volume_size =
            lookup(ENV_DEFAULT_VOLUME_SIZE).unwrap_or(defaults.default_volume_size);
        if crate::resources::quantity::parse_quantity(&default_volume_size).is_err() {
            return Err(ConfigError::InvalidValue {
                key: ENV_DEFAULT_VOLUME_SIZE,
                value: default_volume_size,
                reason: "not a Kubernetes quantity".to_string(),
            });
        }

        Ok(Self {
            pod_name,
            namespace,
            resync_interval: Duration::from_secs(resync_secs),
            reconcile_timeout: Duration::from_secs(timeout_secs),
            exec_pod_wait: LinearBackoff {
                max_attempts: exec_attempts,
                step: Duration::from_millis(exec_backoff_ms),
            },
            conflict_retry: RetryConfig::with_max_attempts(conflict_retries),
            default_volume_size,
            health_port,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
