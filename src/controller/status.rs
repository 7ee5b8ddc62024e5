//! Conditions and status writes of a Dogu
//!
//! Status writes re-read the Dogu, apply a mutation and patch it back with the
//! resource version they read; a version conflict repeats the cycle through
//! the bounded retry combinator.

use chrono::Utc;
use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::{RetryConfig, retry_on_conflict};
use crate::crd::{Condition, Dogu, DoguStatus};

/// Condition types of a Dogu
pub mod condition_types {
    /// Dogu pods run and pass their probes
    pub const HEALTHY: &str = "Healthy";
    /// Dogu serves requests
    pub const READY: &str = "Ready";
    /// A rollout of the dogu is underway
    pub const PROGRESSING: &str = "Progressing";
}

pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Machine-readable condition reasons
pub mod reasons {
    pub const HEALTHY: &str = "DoguHealthy";
    pub const UNHEALTHY: &str = "DoguUnhealthy";
    pub const STOPPED: &str = "Stopped";
    pub const RESTARTING: &str = "Restarting";
    pub const DELETING: &str = "Deleting";
    pub const STARTUP_PROBE_WIDENED: &str = "StartupProbeWidened";
    pub const ROLLOUT_IN_PROGRESS: &str = "RolloutInProgress";
    pub const ROLLOUT_COMPLETE: &str = "RolloutComplete";
}

/// Edits a condition list in place.
///
/// Every touched condition records the builder's generation. Its transition
/// time only moves when the status flips, so repeating a pass with the same
/// outcome leaves timestamps alone.
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
    now: String,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self::from_existing(Vec::new(), generation)
    }

    pub fn from_existing(conditions: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions,
            generation,
            now: Utc::now().to_rfc3339(),
        }
    }

    pub fn set(mut self, type_: &str, status: bool, reason: &str, message: &str) -> Self {
        let status = if status {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        let position = self.conditions.iter().position(|c| c.type_ == type_);
        let condition = match position {
            Some(i) => &mut self.conditions[i],
            None => {
                self.conditions.push(Condition {
                    type_: type_.to_string(),
                    status: condition_status::UNKNOWN.to_string(),
                    reason: String::new(),
                    message: String::new(),
                    last_transition_time: self.now.clone(),
                    observed_generation: None,
                });
                let last = self.conditions.len() - 1;
                &mut self.conditions[last]
            }
        };
        if condition.status != status {
            condition.status = status.to_string();
            condition.last_transition_time = self.now.clone();
        }
        condition.reason = reason.to_string();
        condition.message = message.to_string();
        condition.observed_generation = self.generation;
        self
    }

    pub fn healthy(self, healthy: bool, reason: &str, message: &str) -> Self {
        self.set(condition_types::HEALTHY, healthy, reason, message)
    }

    pub fn ready(self, ready: bool, reason: &str, message: &str) -> Self {
        self.set(condition_types::READY, ready, reason, message)
    }

    pub fn progressing(self, progressing: bool, reason: &str, message: &str) -> Self {
        self.set(condition_types::PROGRESSING, progressing, reason, message)
    }

    /// Healthy and Ready both false for the same reason
    pub fn unavailable(self, reason: &str, message: &str) -> Self {
        self.healthy(false, reason, message)
            .ready(false, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// True when the condition of the given type is set to True
pub fn is_condition_true(dogu: &Dogu, type_: &str) -> bool {
    dogu.condition(type_)
        .is_some_and(|c| c.status == condition_status::TRUE)
}

/// Apply `mutate` to the freshest status of the Dogu and persist it.
///
/// Each attempt reads the Dogu again so a conflicting writer's changes are
/// kept. Nothing is written when the mutation changes nothing. On success
/// `dogu` is replaced by the persisted object.
pub async fn update_status<F>(
    kube: &dyn KubeClient,
    retry: &RetryConfig,
    dogu: &mut Dogu,
    mutate: F,
) -> Result<()>
where
    F: Fn(&mut DoguStatus, Option<i64>) + Send + Sync,
{
    let name = dogu.name_any();
    let name = name.as_str();
    let mutate = &mutate;

    let updated = retry_on_conflict(retry, "update dogu status", || async move {
        let current = kube
            .get_dogu(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dogu {name}")))?;

        let mut status = current.status.clone().unwrap_or_default();
        mutate(&mut status, current.metadata.generation);

        if current.status.as_ref() == Some(&status) {
            return Ok(current);
        }
        kube.patch_dogu_status(&current, &status).await
    })
    .await?;

    *dogu = updated;
    Ok(())
}

/// Set conditions on the freshest status of the Dogu
pub async fn set_conditions<F>(
    kube: &dyn KubeClient,
    retry: &RetryConfig,
    dogu: &mut Dogu,
    build: F,
) -> Result<()>
where
    F: Fn(ConditionBuilder) -> ConditionBuilder + Send + Sync,
{
    update_status(kube, retry, dogu, |status, generation| {
        let existing = std::mem::take(&mut status.conditions);
        status.conditions = build(ConditionBuilder::from_existing(existing, generation)).build();
    })
    .await
}
