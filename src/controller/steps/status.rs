//! Steps writing the Dogu status

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::RetryConfig;
use crate::controller::status::{ConditionBuilder, reasons, set_conditions, update_status};
use crate::controller::step::{Step, StepResult};
use crate::controller::steps::config_restart::latest_pod_start;
use crate::crd::Dogu;
use crate::resources::common::{label_selector, selector_labels};
use crate::resources::deployment::{has_widened_startup_probe, is_available, rollout_complete};

/// Delay before checking an unhealthy dogu again
pub const HEALTH_REQUEUE: Duration = Duration::from_secs(10);

/// Health of a dogu as derived from its Deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoguHealth {
    pub available: bool,
    pub rollout_complete: bool,
    pub probe_widened: bool,
}

impl DoguHealth {
    /// Healthy only when the rollout finished with the regular startup probe
    pub fn is_healthy(&self) -> bool {
        self.available && self.rollout_complete && !self.probe_widened
    }

    fn reason(&self) -> (&'static str, &'static str) {
        if self.probe_widened {
            (reasons::STARTUP_PROBE_WIDENED, "upgrade still booting with widened startup probe")
        } else if !self.rollout_complete {
            (reasons::ROLLOUT_IN_PROGRESS, "deployment rollout in progress")
        } else if !self.available {
            (reasons::UNHEALTHY, "no dogu pod is available")
        } else {
            (reasons::HEALTHY, "all dogu pods are available")
        }
    }
}

/// Pause the pass of a stopped dogu after its resources were applied
pub struct StoppedStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl StoppedStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for StoppedStep {
    fn name(&self) -> &'static str {
        "Stopped"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        if !dogu.spec.stopped {
            return Ok(StepResult::Continue);
        }

        set_conditions(self.kube.as_ref(), &self.retry, dogu, |c| {
            c.unavailable(reasons::STOPPED, "dogu is stopped")
                .progressing(false, reasons::STOPPED, "dogu is stopped")
        })
        .await?;
        debug!(dogu = %dogu.name_any(), "Dogu is stopped");
        Ok(StepResult::Abort)
    }
}

/// Record the requested version as installed
pub struct InstalledVersionStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl InstalledVersionStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for InstalledVersionStep {
    fn name(&self) -> &'static str {
        "InstalledVersion"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let version = dogu.spec.version.clone();
        let previous = dogu.installed_version().map(str::to_string);

        update_status(self.kube.as_ref(), &self.retry, dogu, |status, generation| {
            status.installed_version = Some(version.clone());
            status.observed_generation = generation;
        })
        .await?;

        if previous.as_deref() != Some(version.as_str()) {
            info!(dogu = %dogu.name_any(), ?previous, %version, "Recorded installed version");
        }
        Ok(StepResult::Continue)
    }
}

/// Derive Healthy, Ready and Progressing from the Deployment
pub struct HealthStatusStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl HealthStatusStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for HealthStatusStep {
    fn name(&self) -> &'static str {
        "HealthStatus"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let deployment = self.kube.get_deployment(&name).await?;

        let health = match &deployment {
            Some(d) => DoguHealth {
                available: is_available(d),
                rollout_complete: rollout_complete(d),
                probe_widened: has_widened_startup_probe(d, &name),
            },
            None => DoguHealth {
                available: false,
                rollout_complete: false,
                probe_widened: false,
            },
        };

        let pods = self
            .kube
            .list_pods(&label_selector(&selector_labels(&name)))
            .await?;
        let started_at = latest_pod_start(&pods).map(|t| t.to_rfc3339());

        let healthy = health.is_healthy();
        let (reason, message) = health.reason();
        let rollout_reason = if health.rollout_complete {
            reasons::ROLLOUT_COMPLETE
        } else {
            reasons::ROLLOUT_IN_PROGRESS
        };

        update_status(self.kube.as_ref(), &self.retry, dogu, |status, generation| {
            let existing = std::mem::take(&mut status.conditions);
            status.conditions = ConditionBuilder::from_existing(existing, generation)
                .healthy(healthy, reason, message)
                .ready(healthy, reason, message)
                .progressing(!health.rollout_complete, rollout_reason, message)
                .build();
            if started_at.is_some() {
                status.started_at = started_at.clone();
            }
        })
        .await?;

        if healthy {
            Ok(StepResult::Continue)
        } else {
            debug!(dogu = %name, reason, "Dogu not healthy yet");
            Ok(StepResult::RequeueAfter(HEALTH_REQUEUE))
        }
    }
}

/// Mark a Dogu as being deleted
pub struct DeletingStatusStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl DeletingStatusStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for DeletingStatusStep {
    fn name(&self) -> &'static str {
        "DeletingStatus"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let result = set_conditions(self.kube.as_ref(), &self.retry, dogu, |c| {
            c.unavailable(reasons::DELETING, "dogu is being deleted")
        })
        .await;

        match result {
            Ok(()) => Ok(StepResult::Continue),
            Err(e) if e.is_not_found() => Ok(StepResult::Continue),
            Err(e) => Err(e),
        }
    }
}
