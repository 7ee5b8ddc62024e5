//! Vendor upgrade scripts
//!
//! A dogu may ship a `pre-upgrade` script that has to run inside the old
//! version before it is replaced, and a `post-upgrade` script that runs
//! inside the new version once it has started. Both receive the old and the
//! new version as arguments.
//!
//! The pre-upgrade script only exists in the new image. Its directory is
//! copied from an exec pod running that image into the old dogu pod and
//! executed there. The Deployment then records the target version so the
//! script is not repeated when a later step of the same upgrade fails.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::descriptor::DescriptorFetcher;
use crate::controller::error::{Error, Result};
use crate::controller::exec::{
    CommandExecutor, PodReadiness, ShellCommand, containers_started, copy_between_pods,
};
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::LinearBackoff;
use crate::controller::step::{Step, StepResult};
use crate::controller::steps::exec_pod::{delete_exec_pod_best_effort, ensure_exec_pod};
use crate::crd::{Dogu, POST_UPGRADE_COMMAND, PRE_UPGRADE_COMMAND};
use crate::resources::common::{
    ANNOTATION_POST_UPGRADE_VERSION, ANNOTATION_PRE_UPGRADE_VERSION, label_selector, versioned_labels,
};
use crate::resources::deployment::{
    desired_replicas, pre_upgrade_version, previous_version, template_version,
};

/// Directory in the old dogu pod receiving the pre-upgrade script directory
pub const PRE_UPGRADE_TARGET_DIR: &str = "/tmp/pre-upgrade";

/// Delay before looking for a started pod of the new version again
pub const POD_START_REQUEUE: Duration = Duration::from_secs(10);

/// Directory holding a script and the script's file name
pub fn split_script_path(command: &str) -> (&str, &str) {
    let path = Path::new(command);
    let dir = path
        .parent()
        .and_then(Path::to_str)
        .filter(|d| !d.is_empty())
        .unwrap_or("/");
    let file = path.file_name().and_then(|f| f.to_str()).unwrap_or(command);
    (dir, file)
}

/// First pod of the given dogu version whose containers have started
async fn started_pod(kube: &dyn KubeClient, dogu: &str, version: &str) -> Result<Option<Pod>> {
    let selector = label_selector(&versioned_labels(dogu, version));
    let pods = kube.list_pods(&selector).await?;
    Ok(pods.into_iter().find(containers_started))
}

pub struct PreUpgradeScriptStep {
    kube: Arc<dyn KubeClient>,
    executor: Arc<dyn CommandExecutor>,
    descriptors: Arc<dyn DescriptorFetcher>,
    wait: LinearBackoff,
}

impl PreUpgradeScriptStep {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        executor: Arc<dyn CommandExecutor>,
        descriptors: Arc<dyn DescriptorFetcher>,
        wait: LinearBackoff,
    ) -> Self {
        Self {
            kube,
            executor,
            descriptors,
            wait,
        }
    }

    async fn copy_and_run(&self, exec_pod: &Pod, dogu_pod: &Pod, script: &str, from: &str, to: &str) -> Result<()> {
        let (script_dir, script_file) = split_script_path(script);
        copy_between_pods(
            self.executor.as_ref(),
            exec_pod,
            script_dir,
            dogu_pod,
            PRE_UPGRADE_TARGET_DIR,
        )
        .await?;

        let copied = format!("{PRE_UPGRADE_TARGET_DIR}/{script_file}");
        self.executor
            .exec_command_for_pod(
                dogu_pod,
                &ShellCommand::new(&copied, [from, to]),
                PodReadiness::ContainersStarted,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for PreUpgradeScriptStep {
    fn name(&self) -> &'static str {
        "PreUpgradeScript"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let to = dogu.spec.version.clone();

        // the old pods are gone once the new version is applied
        let deployment = self.kube.get_deployment(&name).await?;
        if let Some(deployment) = &deployment {
            if template_version(deployment) == Some(to.as_str()) {
                if pre_upgrade_version(deployment).is_some() {
                    self.kube
                        .remove_deployment_annotation(&name, ANNOTATION_PRE_UPGRADE_VERSION)
                        .await?;
                    debug!(dogu = %name, version = %to, "Cleared pre-upgrade marker");
                }
                return Ok(StepResult::Continue);
            }
            if pre_upgrade_version(deployment) == Some(to.as_str()) {
                return Ok(StepResult::Continue);
            }
        }
        if dogu.spec.stopped {
            return Ok(StepResult::Continue);
        }

        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        let Some(command) = descriptor.exposed_command(PRE_UPGRADE_COMMAND) else {
            return Ok(StepResult::Continue);
        };
        let from = dogu
            .installed_version()
            .ok_or_else(|| Error::ValidationError(format!("dogu {name} has no installed version")))?
            .to_string();

        // a volume resize leaves the old version scaled down
        if deployment.as_ref().is_some_and(|d| desired_replicas(d) == 0) {
            info!(dogu = %name, %from, "Starting old version for the pre-upgrade script");
            self.kube.scale_deployment(&name, 1).await?;
            return Ok(StepResult::RequeueAfter(POD_START_REQUEUE));
        }

        let dogu_pod = started_pod(self.kube.as_ref(), &name, &from)
            .await?
            .ok_or_else(|| Error::NotFound(format!("running pod of dogu {name} version {from}")))?;

        let exec_pod = ensure_exec_pod(self.kube.as_ref(), dogu, &descriptor, &self.wait).await;
        let result = match exec_pod {
            Ok(exec_pod) => {
                self.copy_and_run(&exec_pod, &dogu_pod, &command.command, &from, &to)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            delete_exec_pod_best_effort(self.kube.as_ref(), dogu).await;
            return Err(e);
        }

        if deployment.is_some() {
            self.kube
                .annotate_deployment(&name, ANNOTATION_PRE_UPGRADE_VERSION, &to)
                .await?;
        }

        info!(dogu = %name, %from, %to, pod = %dogu_pod.name_any(), "Pre-upgrade script finished");
        Ok(StepResult::Continue)
    }
}

pub struct PostUpgradeScriptStep {
    kube: Arc<dyn KubeClient>,
    executor: Arc<dyn CommandExecutor>,
    descriptors: Arc<dyn DescriptorFetcher>,
}

impl PostUpgradeScriptStep {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        executor: Arc<dyn CommandExecutor>,
        descriptors: Arc<dyn DescriptorFetcher>,
    ) -> Self {
        Self {
            kube,
            executor,
            descriptors,
        }
    }
}

#[async_trait]
impl Step for PostUpgradeScriptStep {
    fn name(&self) -> &'static str {
        "PostUpgradeScript"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        if dogu.spec.stopped {
            return Ok(StepResult::Continue);
        }
        let name = dogu.name_any();
        let to = dogu.spec.version.clone();

        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        let Some(command) = descriptor.exposed_command(POST_UPGRADE_COMMAND) else {
            return Ok(StepResult::Continue);
        };

        let deployment = self.kube.get_deployment(&name).await?;
        let from = deployment
            .as_ref()
            .and_then(previous_version)
            .or(dogu.installed_version())
            .map(str::to_string);
        let Some(from) = from else {
            return Ok(StepResult::Continue);
        };

        let Some(pod) = started_pod(self.kube.as_ref(), &name, &to).await? else {
            return Ok(StepResult::RequeueAfter(POD_START_REQUEUE));
        };
        let pod_name = pod.name_any();
        if pod.annotations().get(ANNOTATION_POST_UPGRADE_VERSION) == Some(&to) {
            return Ok(StepResult::Continue);
        }

        self.executor
            .exec_command_for_pod(
                &pod,
                &ShellCommand::new(&command.command, [from.as_str(), to.as_str()]),
                PodReadiness::ContainersStarted,
            )
            .await?;
        self.kube
            .annotate_pod(&pod_name, ANNOTATION_POST_UPGRADE_VERSION, &to)
            .await?;

        info!(dogu = %name, %from, %to, pod = %pod_name, "Post-upgrade script finished");
        Ok(StepResult::Continue)
    }
}
