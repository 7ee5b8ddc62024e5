//! Error types for the Dogu controller

use std::time::Duration;

use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API request failed: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Could not (de)serialize: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid dogu: {0}")]
    ValidationError(String),

    #[error("Descriptor mismatch: {0}")]
    DescriptorMismatch(String),

    #[error("Dependency check failed: {0}")]
    DependencyError(String),

    #[error("Command {command:?} failed in pod {pod}: {output}")]
    ExecFailed {
        pod: String,
        command: String,
        output: String,
    },

    #[error("Exec pod {pod} failed: {reason}")]
    ExecPodFailed { pod: String, reason: String },

    #[error("Gave up waiting for {operation} after {attempts} attempts")]
    WaitExhausted { operation: String, attempts: u32 },

    #[error("Reconcile pass exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("Invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("{} operations failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),

    #[error("Transient failure: {0}")]
    TransientError(String),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            _ => false,
        }
    }

    /// Optimistic concurrency conflict on a write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(api_err)) if api_err.code == 409)
    }

    /// Whether a later pass can succeed without anyone touching the Dogu
    pub fn is_retryable(&self) -> bool {
        match self {
            // Client errors stay failed, apart from 404, 409 and 429
            Error::KubeError(kube::Error::Api(api_err)) if (400..500).contains(&api_err.code) => {
                matches!(api_err.code, 404 | 409 | 429)
            }
            Error::KubeError(_) => true,
            Error::TransientError(_) => true,
            Error::IoError(_) => true,
            Error::NotFound(_) => true,
            Error::WaitExhausted { .. } => true,
            Error::Timeout(_) => true,
            Error::ExecPodFailed { .. } => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retryable),
            // Domain failures clear only after the Dogu or the registry changes
            Error::ValidationError(_) => false,
            Error::DescriptorMismatch(_) => false,
            Error::DependencyError(_) => true,
            Error::ExecFailed { .. } => false,
            Error::InvalidQuantity(_) => false,
            Error::SerializationError(_) => false,
        }
    }

    /// Short machine-readable reason for status conditions and events
    pub fn reason(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubernetesApiError",
            Error::SerializationError(_) => "SerializationFailed",
            Error::IoError(_) => "IoFailed",
            Error::NotFound(_) => "NotFound",
            Error::ValidationError(_) => "ValidationFailed",
            Error::DescriptorMismatch(_) => "DescriptorInvalid",
            Error::DependencyError(_) => "DependencyUnavailable",
            Error::ExecFailed { .. } => "ScriptFailed",
            Error::ExecPodFailed { .. } => "ExecPodFailed",
            Error::WaitExhausted { .. } => "WaitExhausted",
            Error::Timeout(_) => "Timeout",
            Error::InvalidQuantity(_) => "InvalidQuantity",
            Error::Aggregate(_) => "MultipleFailures",
            Error::TransientError(_) => "Transient",
        }
    }

    /// Collapse a list of per-item failures into one error.
    /// Returns `Ok(())` for an empty list and the error itself for a single one.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Requeue delays after a failed pass.
///
/// Retryable failures back off exponentially from `initial_delay` with a
/// symmetric random spread of `jitter` around each step. Everything is capped
/// at `max_delay`, which is also the delay for failures that retrying will
/// not fix.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the step, between 0.0 and 1.0
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let step = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let spread = step * self.jitter * (2.0 * rand::random::<f64>() - 1.0);
        let secs = (step + spread).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        match error.is_retryable() {
            true => self.delay_for_attempt(attempt),
            false => self.max_delay,
        }
    }
}
