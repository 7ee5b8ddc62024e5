//! Finalizer handling
//!
//! The finalizer keeps the Dogu around until the delete pipeline has cleaned
//! up after it. Both steps re-read the Dogu on each attempt and write with the
//! resource version they read.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::controller::retry::{RetryConfig, retry_on_conflict};
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;

/// Finalizer name for cleanup
pub const FINALIZER: &str = "k8s.cloudogu.com/dogu-cleanup";

/// Check if the Dogu carries the given finalizer
pub fn has_finalizer(dogu: &Dogu, finalizer: &str) -> bool {
    dogu.finalizers().iter().any(|f| f == finalizer)
}

/// Finalizer list with `finalizer` appended unless already present
pub fn with_finalizer(finalizers: &[String], finalizer: &str) -> Vec<String> {
    let mut result = finalizers.to_vec();
    if !result.iter().any(|f| f == finalizer) {
        result.push(finalizer.to_string());
    }
    result
}

/// Finalizer list without any occurrence of `finalizer`
pub fn without_finalizer(finalizers: &[String], finalizer: &str) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect()
}

pub struct AddFinalizerStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl AddFinalizerStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for AddFinalizerStep {
    fn name(&self) -> &'static str {
        "AddFinalizer"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        if has_finalizer(dogu, FINALIZER) {
            return Ok(StepResult::Continue);
        }

        let name = dogu.name_any();
        let name = name.as_str();
        let kube = &self.kube;

        let updated = retry_on_conflict(&self.retry, "add finalizer", || async move {
            let current = kube
                .get_dogu(name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("dogu {name}")))?;
            if has_finalizer(&current, FINALIZER) {
                return Ok(current);
            }
            let finalizers = with_finalizer(current.finalizers(), FINALIZER);
            kube.patch_dogu_finalizers(&current, &finalizers).await
        })
        .await?;

        info!(dogu = name, "Added finalizer");
        *dogu = updated;
        Ok(StepResult::Continue)
    }
}

pub struct RemoveFinalizerStep {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
}

impl RemoveFinalizerStep {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self { kube, retry }
    }
}

#[async_trait]
impl Step for RemoveFinalizerStep {
    fn name(&self) -> &'static str {
        "RemoveFinalizer"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let name = name.as_str();
        let kube = &self.kube;

        let updated = retry_on_conflict(&self.retry, "remove finalizer", || async move {
            let Some(current) = kube.get_dogu(name).await? else {
                return Ok(None);
            };
            if !has_finalizer(&current, FINALIZER) {
                return Ok(Some(current));
            }
            let finalizers = without_finalizer(current.finalizers(), FINALIZER);
            kube.patch_dogu_finalizers(&current, &finalizers)
                .await
                .map(Some)
        })
        .await;

        match updated {
            Ok(Some(updated)) => *dogu = updated,
            Ok(None) => {}
            // the API server may drop the object as soon as the list is empty
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(dogu = name, "Removed finalizer");
        Ok(StepResult::Continue)
    }
}
