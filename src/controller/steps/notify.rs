//! Reconcile requests for dependent dogus
//!
//! Dogus depending on a changed dogu may need to adapt (e.g. re-register at
//! an upgraded service). Each installed dependent gets one reconcile request.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::descriptor::DescriptorFetcher;
use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::controller::signals::ReconcileSignals;
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;

pub struct NotifyDependentsStep {
    kube: Arc<dyn KubeClient>,
    descriptors: Arc<dyn DescriptorFetcher>,
    signals: ReconcileSignals,
}

impl NotifyDependentsStep {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        descriptors: Arc<dyn DescriptorFetcher>,
        signals: ReconcileSignals,
    ) -> Self {
        Self {
            kube,
            descriptors,
            signals,
        }
    }
}

#[async_trait]
impl Step for NotifyDependentsStep {
    fn name(&self) -> &'static str {
        "NotifyDependents"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let namespace = dogu.namespace().unwrap_or_default();
        let dogus = self.kube.list_dogus().await?;

        let mut errors = Vec::new();
        let mut notified = 0usize;
        for other in dogus
            .iter()
            .filter(|d| d.name_any() != name && d.installed_version().is_some())
        {
            let other_name = other.name_any();
            match self.descriptors.fetch_installed(&other_name).await {
                Ok(descriptor) if descriptor.depends_on(&dogu.spec.name) => {
                    match self.signals.request(&other_name, &namespace) {
                        Ok(()) => notified += 1,
                        Err(e) => errors.push(e),
                    }
                }
                Ok(_) => {}
                // dependent was removed from the registry meanwhile
                Err(e) if e.is_not_found() => {
                    debug!(dogu = %other_name, "No installed descriptor, skipping");
                }
                Err(e) => errors.push(e),
            }
        }

        if notified > 0 {
            info!(dogu = %name, notified, "Requested reconcile of dependent dogus");
        }
        Error::aggregate(errors)?;
        Ok(StepResult::Continue)
    }
}
