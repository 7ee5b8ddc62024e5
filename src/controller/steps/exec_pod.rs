//! Exec pod lifecycle
//!
//! The exec pod of a dogu exists only while a pre-upgrade script is copied
//! out of the new image. It is created on demand and removed again by the
//! next upgrade pass or by the delete pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::controller::exec::{containers_started, pod_phase};
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::{LinearBackoff, poll_with_linear_backoff};
use crate::controller::step::{Step, StepResult};
use crate::crd::{Dogu, DoguDescriptor};
use crate::resources::exec_pod::{exec_pod_name, generate_exec_pod};

/// Create the exec pod (if needed) and wait until its container started.
///
/// A leftover pod is only reused while it is not terminating and still runs
/// the image of `descriptor`. Anything else is removed first and recreated.
pub async fn ensure_exec_pod(
    kube: &dyn KubeClient,
    dogu: &Dogu,
    descriptor: &DoguDescriptor,
    wait: &LinearBackoff,
) -> Result<Pod> {
    let name = exec_pod_name(dogu);
    let image = descriptor.image_reference();

    match kube.get_pod(&name).await? {
        Some(existing) if is_reusable(&existing, &image) => {
            debug!(pod = %name, image = %image, "Reusing exec pod");
        }
        Some(existing) => {
            info!(
                pod = %name,
                image = %image,
                terminating = existing.metadata.deletion_timestamp.is_some(),
                "Replacing stale exec pod"
            );
            if existing.metadata.deletion_timestamp.is_none() {
                kube.delete_pod(&name).await?;
            }
            wait_until_gone(kube, &name, wait).await?;
            kube.create_pod(&generate_exec_pod(dogu, descriptor)).await?;
            debug!(pod = %name, image = %image, "Created exec pod");
        }
        None => {
            kube.create_pod(&generate_exec_pod(dogu, descriptor)).await?;
            debug!(pod = %name, image = %image, "Created exec pod");
        }
    }

    let pod_name = name.as_str();
    let operation = format!("exec pod {name} to start");
    poll_with_linear_backoff(wait, &operation, || async move {
        match kube.get_pod(pod_name).await? {
            Some(pod) if pod_phase(&pod) == Some("Failed") => Err(Error::ExecPodFailed {
                pod: pod_name.to_string(),
                reason: "exec pod failed to start".to_string(),
            }),
            Some(pod) => Ok(containers_started(&pod)),
            None => Ok(false),
        }
    })
    .await?;

    kube.get_pod(&name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("exec pod {name}")))
}

fn is_reusable(pod: &Pod, image: &str) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .and_then(|container| container.image.as_deref())
            == Some(image)
}

async fn wait_until_gone(kube: &dyn KubeClient, name: &str, wait: &LinearBackoff) -> Result<()> {
    let operation = format!("exec pod {name} to disappear");
    poll_with_linear_backoff(wait, &operation, || async move {
        Ok(kube.get_pod(name).await?.is_none())
    })
    .await
}

/// Remove the exec pod, logging instead of failing
pub async fn delete_exec_pod_best_effort(kube: &dyn KubeClient, dogu: &Dogu) {
    let name = exec_pod_name(dogu);
    if let Err(e) = kube.delete_pod(&name).await {
        warn!(pod = %name, error = %e, "Failed to delete exec pod");
    }
}

pub struct DeleteExecPodStep {
    kube: Arc<dyn KubeClient>,
}

impl DeleteExecPodStep {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Step for DeleteExecPodStep {
    fn name(&self) -> &'static str {
        "DeleteExecPod"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = exec_pod_name(dogu);
        self.kube.delete_pod(&name).await?;
        debug!(pod = %name, dogu = %dogu.name_any(), "Exec pod absent");
        Ok(StepResult::Continue)
    }
}
