//! Startup probe widening around upgrades
//!
//! The first boot of a new version may migrate data for a long time. The
//! probe threshold is raised to [`WIDENED_STARTUP_FAILURE_THRESHOLD`] before
//! the new version is applied and restored once its rollout has finished.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::info;

use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;
use crate::resources::deployment::{
    WIDENED_STARTUP_FAILURE_THRESHOLD, has_widened_startup_probe, rollout_complete,
    template_version,
};

/// Delay before checking an upgrade rollout again
pub const ROLLOUT_REQUEUE: Duration = Duration::from_secs(10);

/// What to do with the startup probe of a live deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeAction {
    Keep,
    Widen,
    /// The requested version is applied but still rolling out
    WaitForRollout,
    Revert,
}

/// Decide between widening, waiting and reverting for a live deployment
pub fn probe_action(deployment: &Deployment, container: &str, version: &str) -> ProbeAction {
    let widened = has_widened_startup_probe(deployment, container);
    let on_version = template_version(deployment) == Some(version);

    match (on_version, widened) {
        (false, false) => ProbeAction::Widen,
        (true, true) if rollout_complete(deployment) => ProbeAction::Revert,
        (true, true) => ProbeAction::WaitForRollout,
        _ => ProbeAction::Keep,
    }
}

pub struct WidenStartupProbeStep {
    kube: Arc<dyn KubeClient>,
}

impl WidenStartupProbeStep {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Step for WidenStartupProbeStep {
    fn name(&self) -> &'static str {
        "WidenStartupProbe"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let Some(deployment) = self.kube.get_deployment(&name).await? else {
            return Ok(StepResult::Continue);
        };

        if probe_action(&deployment, &name, &dogu.spec.version) == ProbeAction::Widen {
            self.kube
                .patch_startup_probe(&name, &name, Some(WIDENED_STARTUP_FAILURE_THRESHOLD))
                .await?;
            info!(
                deployment = %name,
                threshold = WIDENED_STARTUP_FAILURE_THRESHOLD,
                "Widened startup probe for upgrade"
            );
        }
        Ok(StepResult::Continue)
    }
}

pub struct RevertStartupProbeStep {
    kube: Arc<dyn KubeClient>,
}

impl RevertStartupProbeStep {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Step for RevertStartupProbeStep {
    fn name(&self) -> &'static str {
        "RevertStartupProbe"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let Some(deployment) = self.kube.get_deployment(&name).await? else {
            return Ok(StepResult::Continue);
        };

        match probe_action(&deployment, &name, &dogu.spec.version) {
            ProbeAction::WaitForRollout => Ok(StepResult::RequeueAfter(ROLLOUT_REQUEUE)),
            ProbeAction::Revert => {
                let threshold = dogu.spec.startup_probe_failure_threshold;
                self.kube.patch_startup_probe(&name, &name, threshold).await?;
                info!(deployment = %name, ?threshold, "Restored startup probe after upgrade");
                Ok(StepResult::Continue)
            }
            ProbeAction::Keep | ProbeAction::Widen => Ok(StepResult::Continue),
        }
    }
}
